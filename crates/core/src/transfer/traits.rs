//! Remote destination capability.
//!
//! Sessions are blocking; the engine drives them from `spawn_blocking`.
//! Remote paths are `/`-separated strings.

use std::path::Path;

use super::error::TransferError;

/// An open connection to the remote destination. Dropping it tears the
/// connection down.
pub trait RemoteSession {
    /// Create a directory and any missing parents.
    fn mkdir_all(&mut self, dir: &str) -> Result<(), TransferError>;

    /// Write a local file to `remote`, replacing anything already there.
    /// Returns the number of bytes sent.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransferError>;

    /// Size of a remote file, `None` if it does not exist.
    fn size(&mut self, remote: &str) -> Result<Option<u64>, TransferError>;

    /// Hex MD5 digest of a remote file, computed by reading it back.
    fn md5(&mut self, remote: &str) -> Result<String, TransferError>;

    /// Move `from` to `to`, replacing `to` if present.
    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError>;

    /// Delete a remote file.
    fn remove(&mut self, remote: &str) -> Result<(), TransferError>;

    /// Names of the entries in a directory. A missing directory is empty.
    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError>;
}

/// Opens sessions to one remote destination.
pub trait RemoteConnector: Send + Sync {
    /// Human-readable destination, for logs.
    fn describe(&self) -> String;

    fn connect(&self) -> Result<Box<dyn RemoteSession + Send>, TransferError>;
}

/// Join a remote directory and a name.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/upload/2024", "a.zip"), "/upload/2024/a.zip");
        assert_eq!(join_remote("/upload/", "a.zip"), "/upload/a.zip");
        assert_eq!(join_remote("", "a.zip"), "a.zip");
    }
}
