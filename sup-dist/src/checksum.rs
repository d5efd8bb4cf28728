use anyhow::{Context, Result};
use digest::{Digest, DynDigest};
use log::{debug, info};
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("`{0}` is not a SHA-256 digest, which must be 64 hex characters")]
    InvalidDigest(String),
    #[error("checksum for {file} is incorrect: expected {expected}, got {actual}")]
    Mismatch {
        file: String,
        expected: String,
        actual: String,
    },
}

struct HashWriter<'a>(&'a mut dyn DynDigest);

impl Write for HashWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Checks that `s` looks like a hex encoded SHA-256 digest.
///
/// # Errors
///
/// Returns [`ChecksumError::InvalidDigest`] if it does not.
pub fn validate_sha256(s: &str) -> Result<(), ChecksumError> {
    if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ChecksumError::InvalidDigest(s.to_string()))
    }
}

pub(crate) fn sha256_for(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher: Box<dyn DynDigest> = Box::new(sha2::Sha256::new());
    let mut writer = HashWriter(hasher.as_mut());
    io::copy(&mut file, &mut writer)
        .with_context(|| format!("failed to read {} for checksumming", path.display()))?;
    Ok(base16ct::lower::encode_string(&hasher.finalize()))
}

/// Compares the SHA-256 digest of the file at `path` with `expected`. The comparison ignores
/// case.
pub(crate) fn verify(path: &Path, expected: &str) -> Result<()> {
    debug!("verifying checksum of {}", path.display());

    let actual = sha256_for(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        info!("checksum for {} is correct: got {actual}", path.display());
        Ok(())
    } else {
        Err(ChecksumError::Mismatch {
            file: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        }
        .into())
    }
}
