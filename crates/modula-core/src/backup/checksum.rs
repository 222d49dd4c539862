//! Backup artifact checksums (hex-encoded SHA-256)

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::Result;

const CHUNK: usize = 64 * 1024;

pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Stream a file through SHA-256
pub async fn checksum_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = tokio::fs::File::open(path.as_ref()).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file against a recorded checksum; case-insensitive
pub async fn verify_file(path: impl AsRef<Path>, expected: &str) -> Result<bool> {
    let actual = checksum_file(path).await?;
    Ok(actual.eq_ignore_ascii_case(expected.trim()))
}
