//! BLAKE3 digests of published archives

use bindist_errors::Error;
use blake3::Hasher;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Size of chunks for streaming hash computation
const CHUNK_SIZE: usize = 64 * 1024;

/// Hex BLAKE3 digest of a file
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub async fn hash_file(path: &Path) -> Result<String, Error> {
    let mut file = File::open(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;

    let mut hasher = Hasher::new();
    let mut buffer = vec![0; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matches_in_memory_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        let data = vec![7u8; CHUNK_SIZE * 2 + 17];
        std::fs::write(&path, &data).unwrap();

        let digest = hash_file(&path).await.unwrap();
        assert_eq!(digest, blake3::hash(&data).to_hex().to_string());
        assert_eq!(digest.len(), 64);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(hash_file(&dir.path().join("absent")).await.is_err());
    }
}
