//! Scoped on-disk copies of rendered scripts.

use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::{Builder, NamedTempFile};

use crate::core::errors::{HarnessError, Result};

/// A rendered script written to a uniquely named temp file.
///
/// The file is removed when the value drops, on success, failure and timeout
/// alike.
pub struct TransientScript {
    file: NamedTempFile,
    digest: String,
}

impl TransientScript {
    /// Write `text` to `<dir>/csh-XXXXXX.<extension>`.
    pub fn create(dir: &Path, extension: &str, text: &str) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|source| HarnessError::io(dir, source))?;
        let suffix = format!(".{extension}");
        let mut file = Builder::new()
            .prefix("csh-")
            .suffix(&suffix)
            .tempfile_in(dir)
            .map_err(|source| HarnessError::io(dir, source))?;
        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| HarnessError::io(file.path(), source))?;
        Ok(Self {
            file,
            digest: sha256_hex(text.as_bytes()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// SHA-256 of the script text, hex encoded.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// SHA-256 hex digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(bytes);
    digest
        .iter()
        .fold(String::with_capacity(digest.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}
