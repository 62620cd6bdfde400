//! Api key generation and redaction.

use rand::Rng;

/// Length of every generated key.
pub const KEY_LENGTH: usize = 64;

/// Keys carry no header or checksum; the letters alone do not reveal where a
/// key is valid.
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRST";

/// Number of leading characters kept by [`redact`].
const REDACTED_PREFIX: usize = 6;

/// Generate a fresh random key from the thread-local CSPRNG.
pub fn generate_unique_key() -> String {
    let mut rng = rand::rng();
    (0..KEY_LENGTH)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Shorten a key for logging.
pub fn redact(key: &str) -> &str {
    match key.char_indices().nth(REDACTED_PREFIX) {
        Some((end, _)) => &key[..end],
        None => key,
    }
}
