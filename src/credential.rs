//! Short-lived on-disk client credentials.
//!
//! The TLS client wants a file path for the client identity, so the combined
//! key and certificate are written to a unique owner-only temp file for the
//! length of one upstream call.

use crate::error::GatewayError;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FILE_PREFIX: &str = "soap-client-cert-";
const FILE_SUFFIX: &str = ".pem";

/// Ownership token for a credential file. Removed on [`release`](Self::release),
/// or on drop if the owning call is cancelled first.
#[derive(Debug)]
pub struct CredentialFile {
    path: PathBuf,
    released: bool,
}

impl CredentialFile {
    /// Write `pem` to a new file under `dir` (or the system temp dir).
    pub fn materialize(pem: &str, dir: Option<&Path>) -> Result<Self, GatewayError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(FILE_PREFIX).suffix(FILE_SUFFIX);
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| GatewayError::Credential(e.to_string()))?;

        file.write_all(pem.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| GatewayError::Credential(e.to_string()))?;

        // The handle closes here; only the path outlives this call.
        let (_, path) = file
            .keep()
            .map_err(|e| GatewayError::Credential(e.to_string()))?;
        debug!(path = %path.display(), "Wrote client credential file");

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file. A file that is already gone is not an error.
    pub fn release(mut self) -> io::Result<()> {
        self.released = true;
        remove(&self.path)
    }
}

impl Drop for CredentialFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove client credential file");
        }
    }
}

fn remove(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
