#![deny(unsafe_code)]

use sha2::Digest;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = sha2::Sha256::digest(bytes);
    hex::encode(digest)
}

/// Hash of a source line as recorded in an anchor.
///
/// The line terminator is not part of the hash so that CRLF and LF checkouts
/// of the same file anchor identically.
pub fn line_hash(line: &str) -> String {
    sha256_hex(line.trim_end_matches(['\n', '\r']).as_bytes())
}
