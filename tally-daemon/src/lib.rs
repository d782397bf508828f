//! Daemon runtime: scheduler + bounded sync workers + socket server.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    daemon_running, request_ack, request_ack_message, request_status, request_stop,
    request_sync, request_unack, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, start_blocking, PassSummary};
