use std::path::{Path, PathBuf};

use tally_core::config::tally_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    tally_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    tally_root(home).join(DAEMON_SOCKET)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_lives_under_the_tally_root() {
        let home = Path::new("/home/ops");
        assert_eq!(socket_path(home), PathBuf::from("/home/ops/.tally/daemon.sock"));
        assert_eq!(run_dir(home), PathBuf::from("/home/ops/.tally/run"));
    }
}
