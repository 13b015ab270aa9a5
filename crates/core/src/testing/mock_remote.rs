//! In-memory remote destination for testing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::transfer::{RemoteConnector, RemoteSession, TransferError};

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    connects: usize,
    uploads: usize,
    connect_failures: u32,
    truncate_uploads: u32,
    truncate_keep: usize,
    corrupt_uploads: u32,
}

/// Mock implementation of RemoteConnector backed by a map of paths.
///
/// Provides controllable behavior for testing:
/// - Fail the next N connection attempts
/// - Cut the next N uploads short, leaving a truncated file behind
/// - Corrupt the next N uploads without changing their size
/// - Count connections and uploads
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        lock(&self.state)
    }

    /// Refuse the next `n` connections.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    /// Drop the next `n` uploads after `keep` bytes.
    pub fn truncate_next_uploads(&self, n: u32, keep: usize) {
        let mut state = self.lock();
        state.truncate_uploads = n;
        state.truncate_keep = keep;
    }

    /// Flip bits in the next `n` uploads.
    pub fn corrupt_next_uploads(&self, n: u32) {
        self.lock().corrupt_uploads = n;
    }

    /// Store a file directly, as if uploaded by someone else.
    pub fn put_file(&self, path: &str, contents: &[u8]) {
        let mut state = self.lock();
        if let Some((parent, _)) = path.rsplit_once('/') {
            add_dirs(&mut state.dirs, parent);
        }
        state.files.insert(path.to_string(), contents.to_vec());
    }

    /// Contents of a remote file.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// All remote file paths, sorted.
    pub fn files(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn upload_count(&self) -> usize {
        self.lock().uploads
    }
}

fn lock(state: &Mutex<RemoteState>) -> MutexGuard<'_, RemoteState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn add_dirs(dirs: &mut BTreeSet<String>, dir: &str) {
    let mut current = String::new();
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !current.is_empty() || dir.starts_with('/') {
            current.push('/');
        }
        current.push_str(part);
        dirs.insert(current.clone());
    }
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

impl RemoteConnector for MockRemote {
    fn describe(&self) -> String {
        "mock remote".to_string()
    }

    fn connect(&self) -> Result<Box<dyn RemoteSession + Send>, TransferError> {
        let mut state = self.lock();
        state.connects += 1;
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransferError::connect("mock", "connection refused"));
        }
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockSession {
    state: Arc<Mutex<RemoteState>>,
}

impl RemoteSession for MockSession {
    fn mkdir_all(&mut self, dir: &str) -> Result<(), TransferError> {
        add_dirs(&mut lock(&self.state).dirs, dir);
        Ok(())
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransferError> {
        let mut data = std::fs::read(local).map_err(|e| TransferError::LocalRead {
            path: local.to_path_buf(),
            source: e,
        })?;

        let mut state = lock(&self.state);
        let dir = parent(remote);
        if !dir.is_empty() && !state.dirs.contains(dir) {
            return Err(TransferError::remote("create", remote, "no such directory"));
        }
        state.uploads += 1;

        if state.truncate_uploads > 0 {
            state.truncate_uploads -= 1;
            data.truncate(state.truncate_keep);
            state.files.insert(remote.to_string(), data);
            return Err(TransferError::remote("write", remote, "connection reset"));
        }
        if state.corrupt_uploads > 0 {
            state.corrupt_uploads -= 1;
            if let Some(byte) = data.first_mut() {
                *byte ^= 0xff;
            }
        }

        let len = data.len() as u64;
        state.files.insert(remote.to_string(), data);
        Ok(len)
    }

    fn size(&mut self, remote: &str) -> Result<Option<u64>, TransferError> {
        Ok(lock(&self.state).files.get(remote).map(|d| d.len() as u64))
    }

    fn md5(&mut self, remote: &str) -> Result<String, TransferError> {
        lock(&self.state)
            .files
            .get(remote)
            .map(|d| format!("{:x}", md5::compute(d)))
            .ok_or_else(|| TransferError::remote("open", remote, "no such file"))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError> {
        let mut state = lock(&self.state);
        let data = state
            .files
            .remove(from)
            .ok_or_else(|| TransferError::remote("rename", from, "no such file"))?;
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    fn remove(&mut self, remote: &str) -> Result<(), TransferError> {
        lock(&self.state)
            .files
            .remove(remote)
            .map(|_| ())
            .ok_or_else(|| TransferError::remote("remove", remote, "no such file"))
    }

    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        let state = lock(&self.state);
        let dir = dir.trim_end_matches('/');
        let mut names: BTreeSet<String> = state
            .files
            .keys()
            .filter(|path| parent(path) == dir)
            .filter_map(|path| path.rsplit_once('/').map(|(_, name)| name.to_string()))
            .collect();
        names.extend(
            state
                .dirs
                .iter()
                .filter(|path| parent(path) == dir)
                .filter_map(|path| path.rsplit_once('/').map(|(_, name)| name.to_string())),
        );
        Ok(names.into_iter().collect())
    }
}
