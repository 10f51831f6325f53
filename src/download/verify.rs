// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Post-transfer verification: size always, SHA-256 when a digest is known.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;

use super::types::Verification;

const HASH_CHUNK_SIZE: usize = 8192;

/// Check a file against the expected size and, if given, a hex SHA-256 digest.
///
/// Size is checked first; the hash is only computed when the size matches.
pub async fn verify(path: &Path, expected_size: u64, expected_hash: Option<&str>) -> io::Result<Verification> {
    let actual = tokio::fs::metadata(path).await?.len();
    if actual != expected_size {
        return Ok(Verification::SizeMismatch {
            expected: expected_size,
            actual,
        });
    }

    match expected_hash {
        Some(expected) => {
            let actual_hash = sha256_file(path).await?;
            if actual_hash.eq_ignore_ascii_case(expected) {
                Ok(Verification::Verified {
                    size: actual,
                    hash: Some(actual_hash),
                })
            } else {
                Ok(Verification::HashMismatch {
                    expected: expected.to_ascii_lowercase(),
                    actual: actual_hash,
                })
            }
        }
        None => Ok(Verification::Verified { size: actual, hash: None }),
    }
}

/// Lowercase hex SHA-256 of a file, read in bounded chunks.
pub async fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // sha256("hello world")
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn test_verify_size_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"hello world").unwrap();

        let result = verify(&path, 11, None).await.unwrap();
        assert_eq!(result, Verification::Verified { size: 11, hash: None });

        let short = verify(&path, 12, None).await.unwrap();
        assert_eq!(short, Verification::SizeMismatch { expected: 12, actual: 11 });
    }

    #[tokio::test]
    async fn test_verify_with_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"hello world").unwrap();

        let upper = HELLO_SHA256.to_ascii_uppercase();
        let result = verify(&path, 11, Some(&upper)).await.unwrap();
        assert!(result.is_verified());

        let wrong = "0".repeat(64);
        let mismatch = verify(&path, 11, Some(&wrong)).await.unwrap();
        assert!(matches!(mismatch, Verification::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn test_sha256_file_spans_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.bin");
        let data = vec![7u8; HASH_CHUNK_SIZE * 3 + 17];
        std::fs::write(&path, &data).unwrap();

        let expected = hex::encode(Sha256::digest(&data));
        assert_eq!(sha256_file(&path).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_verify_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(verify(&dir.path().join("nope"), 1, None).await.is_err());
    }
}
