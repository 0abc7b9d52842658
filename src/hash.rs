//! Content hashing helpers shared by the file ledger (§4.3) and certificate
//! pinning (§4.2).
//!
//! The ledger hashes compressed archive bytes directly with `blake3`, a
//! modern collision-resistant hash well suited to multi-GB archives.
//! Certificate fingerprints use SHA-256 because that is the digest
//! exchanges and browsers publish pinned fingerprints in.

use std::io::Read;

/// BLAKE3 hash of a byte slice, as lowercase hex. Used to key the file
/// ledger by archive content rather than filename or mtime.
pub fn content_hash_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// BLAKE3 hash of a file's contents, streamed in fixed-size chunks so
/// multi-GB archives don't need to be read into memory at once.
pub fn content_hash_of_file(path: &std::path::Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// SHA-256 hash of a byte slice (e.g. a DER-encoded certificate), as
/// lowercase hex.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}
