//! Remote that is a local or mounted directory.

use std::path::Path;

use super::engine::md5_file;
use super::error::TransferError;
use super::traits::{RemoteConnector, RemoteSession};

/// Treats remote paths as local filesystem paths.
#[derive(Debug, Default, Clone)]
pub struct LocalConnector;

impl RemoteConnector for LocalConnector {
    fn describe(&self) -> String {
        "local filesystem".to_string()
    }

    fn connect(&self) -> Result<Box<dyn RemoteSession + Send>, TransferError> {
        Ok(Box::new(LocalSession))
    }
}

pub struct LocalSession;

impl RemoteSession for LocalSession {
    fn mkdir_all(&mut self, dir: &str) -> Result<(), TransferError> {
        std::fs::create_dir_all(dir).map_err(|e| TransferError::remote("mkdir", dir, e))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransferError> {
        if !local.is_file() {
            return Err(TransferError::LocalRead {
                path: local.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a file"),
            });
        }
        let bytes =
            std::fs::copy(local, remote).map_err(|e| TransferError::remote("upload", remote, e))?;
        let file = std::fs::File::open(remote).map_err(|e| TransferError::remote("sync", remote, e))?;
        file.sync_all()
            .map_err(|e| TransferError::remote("sync", remote, e))?;
        Ok(bytes)
    }

    fn size(&mut self, remote: &str) -> Result<Option<u64>, TransferError> {
        match std::fs::metadata(remote) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TransferError::remote("stat", remote, e)),
        }
    }

    fn md5(&mut self, remote: &str) -> Result<String, TransferError> {
        md5_file(Path::new(remote)).map_err(|e| TransferError::remote("read", remote, e))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError> {
        std::fs::rename(from, to).map_err(|e| TransferError::remote("rename", to, e))
    }

    fn remove(&mut self, remote: &str) -> Result<(), TransferError> {
        std::fs::remove_file(remote).map_err(|e| TransferError::remote("remove", remote, e))
    }

    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TransferError::remote("list", dir, e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TransferError::remote("list", dir, e))?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }
}
