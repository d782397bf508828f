//! Content fingerprints: SHA-256 over ordered field text.
//!
//! Parts are joined with the ASCII unit separator (0x1f) before hashing so
//! that `["ab", "c"]` and `["a", "bc"]` differ. Null fields contribute the
//! empty string.

use sha2::{Digest, Sha256};

use tally_core::FieldValue;

const SEPARATOR: [u8; 1] = [0x1f];

/// Hex SHA-256 over the ordered parts.
pub fn digest_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut h = Sha256::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            h.update(SEPARATOR);
        }
        h.update(part.as_ref().as_bytes());
    }
    hex::encode(h.finalize())
}

/// Fingerprint of a record's meaningful fields, in the given order.
pub fn fingerprint<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = &'a FieldValue>,
{
    digest_parts(fields.into_iter().map(ToString::to_string))
}

/// Order-independent checksum over a record set.
///
/// Records are sorted by `(sort_key, value)` before their values are
/// concatenated, so any permutation of `records` yields the same digest.
pub fn aggregate_checksum<T, K, F, V>(records: &[T], sort_key: F, value: V) -> String
where
    K: Ord,
    F: Fn(&T) -> K,
    V: Fn(&T) -> String,
{
    let mut entries: Vec<(K, String)> = records.iter().map(|r| (sort_key(r), value(r))).collect();
    entries.sort();
    digest_parts(entries.into_iter().map(|(_, v)| v))
}
