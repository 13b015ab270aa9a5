//! SFTP remote over `ssh2`.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{ErrorCode, RenameFlags, Session, Sftp};
use tracing::debug;

use super::config::RemoteConfig;
use super::engine::md5_reader;
use super::error::TransferError;
use super::traits::{RemoteConnector, RemoteSession};

/// `LIBSSH2_FX_NO_SUCH_FILE`
const FX_NO_SUCH_FILE: i32 = 2;

const COPY_BUFFER_SIZE: usize = 256 * 1024;

/// Opens SFTP sessions with password or private key authentication.
pub struct SftpConnector {
    config: RemoteConfig,
}

impl SftpConnector {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    fn target(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    fn open_tcp(&self) -> Result<TcpStream, TransferError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        let addrs = (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .map_err(|e| TransferError::connect(self.target(), e))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(tcp) => {
                    tcp.set_read_timeout(Some(timeout))
                        .and_then(|_| tcp.set_write_timeout(Some(timeout)))
                        .map_err(|e| TransferError::connect(self.target(), e))?;
                    return Ok(tcp);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(TransferError::connect(
            self.target(),
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string()),
        ))
    }

    fn authenticate(&self, session: &Session) -> Result<(), TransferError> {
        let auth_err = |reason: String| TransferError::Auth {
            username: self.config.username.clone(),
            reason,
        };

        let mut key_error = None;
        if let Some(key) = &self.config.private_key {
            match session.userauth_pubkey_file(&self.config.username, None, key, None) {
                Ok(()) => return Ok(()),
                Err(e) => key_error = Some(format!("private key {}: {}", key.display(), e)),
            }
        }

        match (&self.config.password, key_error) {
            (Some(password), _) => session
                .userauth_password(&self.config.username, password)
                .map_err(|e| auth_err(e.to_string()))?,
            (None, Some(reason)) => return Err(auth_err(reason)),
            (None, None) => {
                return Err(auth_err("no password or private key configured".to_string()))
            }
        }

        if !session.authenticated() {
            return Err(auth_err("server did not accept credentials".to_string()));
        }
        Ok(())
    }
}

impl RemoteConnector for SftpConnector {
    fn describe(&self) -> String {
        format!("sftp://{}@{}", self.config.username, self.target())
    }

    fn connect(&self) -> Result<Box<dyn RemoteSession + Send>, TransferError> {
        let tcp = self.open_tcp()?;

        let mut session = Session::new().map_err(|e| TransferError::connect(self.target(), e))?;
        session.set_timeout((self.config.connect_timeout_secs.max(1) * 1000).min(u32::MAX as u64) as u32);
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| TransferError::connect(self.target(), e))?;
        self.authenticate(&session)?;

        let sftp = session
            .sftp()
            .map_err(|e| TransferError::connect(self.target(), e))?;
        debug!("Opened SFTP session to {}", self.describe());

        Ok(Box::new(SftpSession { sftp, session }))
    }
}

/// A live SFTP session. Dropping it disconnects.
pub struct SftpSession {
    sftp: Sftp,
    session: Session,
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "nightrelay done", None) {
            debug!("SFTP disconnect failed: {}", e);
        }
    }
}

/// Servers without the `fsync@openssh.com` extension reject the call; the
/// data is already flushed, so the upload stands either way.
fn fsync_logged(remote: &str, result: Result<(), ssh2::Error>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            debug!("SFTP fsync of {} failed: {}", remote, e);
            false
        }
    }
}

fn is_missing(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::SFTP(FX_NO_SUCH_FILE))
}

impl RemoteSession for SftpSession {
    fn mkdir_all(&mut self, dir: &str) -> Result<(), TransferError> {
        let absolute = dir.starts_with('/');
        let mut current = String::new();
        for part in dir.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() || absolute {
                current.push('/');
            }
            current.push_str(part);

            let path = Path::new(&current);
            match self.sftp.stat(path) {
                Ok(stat) if stat.is_dir() => continue,
                Ok(_) => return Err(TransferError::remote("mkdir", &current, "not a directory")),
                Err(e) if is_missing(&e) => {
                    self.sftp
                        .mkdir(path, 0o755)
                        .map_err(|e| TransferError::remote("mkdir", &current, e))?;
                }
                Err(e) => return Err(TransferError::remote("stat", &current, e)),
            }
        }
        Ok(())
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, TransferError> {
        let mut source = std::fs::File::open(local).map_err(|e| TransferError::LocalRead {
            path: local.to_path_buf(),
            source: e,
        })?;
        let mut dest = self
            .sftp
            .create(Path::new(remote))
            .map_err(|e| TransferError::remote("create", remote, e))?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = source.read(&mut buffer).map_err(|e| TransferError::LocalRead {
                path: local.to_path_buf(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            dest.write_all(&buffer[..n])
                .map_err(|e| TransferError::remote("write", remote, e))?;
            total += n as u64;
        }
        dest.flush()
            .map_err(|e| TransferError::remote("write", remote, e))?;
        fsync_logged(remote, dest.fsync());
        Ok(total)
    }

    fn size(&mut self, remote: &str) -> Result<Option<u64>, TransferError> {
        match self.sftp.stat(Path::new(remote)) {
            Ok(stat) => Ok(Some(stat.size.unwrap_or(0))),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(TransferError::remote("stat", remote, e)),
        }
    }

    fn md5(&mut self, remote: &str) -> Result<String, TransferError> {
        let mut file = self
            .sftp
            .open(Path::new(remote))
            .map_err(|e| TransferError::remote("open", remote, e))?;
        md5_reader(&mut file).map_err(|e| TransferError::remote("read", remote, e))
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), TransferError> {
        let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
        let first = match self.sftp.rename(Path::new(from), Path::new(to), flags) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        // SFTPv3 servers refuse to rename over an existing file.
        if self.size(to)?.is_none() {
            return Err(TransferError::remote("rename", to, first));
        }
        debug!("Rename over {} refused ({}), replacing", to, first);
        self.remove(to)?;
        self.sftp
            .rename(Path::new(from), Path::new(to), None)
            .map_err(|e| TransferError::remote("rename", to, e))
    }

    fn remove(&mut self, remote: &str) -> Result<(), TransferError> {
        self.sftp
            .unlink(Path::new(remote))
            .map_err(|e| TransferError::remote("remove", remote, e))
    }

    fn list(&mut self, dir: &str) -> Result<Vec<String>, TransferError> {
        match self.sftp.readdir(Path::new(dir)) {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter_map(|(path, _)| {
                    path.file_name().map(|n| n.to_string_lossy().to_string())
                })
                .collect()),
            Err(e) if is_missing(&e) => Ok(Vec::new()),
            Err(e) => Err(TransferError::remote("list", dir, e)),
        }
    }
}
