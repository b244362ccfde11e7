//! Streaming SHA-256 digests of exported containers and their `.sha256` sidecars.

use crate::codec::CHECKSUM_EXTENSION;
use crate::error::{JailpackError, JailpackResult};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

/// Read size used when hashing containers.
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Hex SHA-256 of the file at `path`.
pub fn digest_file(path: &Path) -> JailpackResult<String> {
    digest_file_with_chunk_size(path, DEFAULT_CHUNK_SIZE)
}

/// Hex SHA-256 of the file at `path`, read `chunk_size` bytes at a time.
pub fn digest_file_with_chunk_size(path: &Path, chunk_size: usize) -> JailpackResult<String> {
    if chunk_size == 0 {
        return Err(JailpackError::InvalidConfig(
            "checksum chunk size must be non-zero".to_string(),
        ));
    }
    let io_err = |source: std::io::Error| JailpackError::ChecksumIo {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size];
    loop {
        let read = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_err(err)),
        };
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Sidecar location for `container`: same stem, `.sha256` extension.
pub fn checksum_path(container: &Path) -> PathBuf {
    container.with_extension(CHECKSUM_EXTENSION)
}

/// Hash `container` and write the lowercase hex digest to its sidecar.
pub fn write_checksum(container: &Path, chunk_size: usize) -> JailpackResult<(PathBuf, String)> {
    let digest = digest_file_with_chunk_size(container, chunk_size)?;
    let sidecar = checksum_path(container);
    fs::write(&sidecar, &digest).map_err(|source| JailpackError::ChecksumIo {
        path: sidecar.clone(),
        source,
    })?;
    Ok((sidecar, digest))
}

/// Recompute the digest of `container` and compare it with its sidecar.
pub fn verify_checksum(container: &Path, chunk_size: usize) -> JailpackResult<String> {
    let sidecar = checksum_path(container);
    let expected = fs::read_to_string(&sidecar).map_err(|source| JailpackError::ChecksumIo {
        path: sidecar.clone(),
        source,
    })?;
    let expected = expected.trim().to_ascii_lowercase();
    let actual = digest_file_with_chunk_size(container, chunk_size)?;
    if expected != actual {
        return Err(JailpackError::ChecksumMismatch {
            path: container.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(actual)
}
