use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle, Msg};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lampwatch_core::config::{CONNECT_TIMEOUT, SessionConfig};
use lampwatch_core::model::ExecutionResult;

use super::error::SshError;
use super::handler::ClientHandler;

const DEFAULT_IDENTITIES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];
const PTY_COLS: u32 = 200;
const PTY_ROWS: u32 = 50;

/// One authenticated SSH connection.
///
/// Commands are serialized through the handle lock. The connection is
/// re-established on the next command after it drops.
pub struct RemoteSession {
    config: SessionConfig,
    ssh_config: Arc<client::Config>,
    handle: Mutex<Option<Handle<ClientHandler>>>,
}

impl RemoteSession {
    /// Connect and authenticate
    pub async fn connect(config: SessionConfig) -> Result<Self, SshError> {
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };
        let session = Self {
            config,
            ssh_config: Arc::new(ssh_config),
            handle: Mutex::new(None),
        };
        {
            let mut guard = session.handle.lock().await;
            session.ensure_connected(&mut guard).await?;
        }
        Ok(session)
    }

    /// Run `cmd` on a fresh exec channel and capture its output
    pub async fn execute(&self, cmd: &str) -> Result<ExecutionResult, SshError> {
        let mut guard = self.handle.lock().await;
        let mut channel = self.open_channel(&mut guard).await?;
        channel.exec(true, cmd).await?;

        let mut capture = Capture::default();
        while let Some(msg) = channel.wait().await {
            if capture.absorb(&msg) {
                break;
            }
        }
        let _ = channel.close().await;
        Ok(capture.into_result())
    }

    /// Whole file contents over SFTP
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        let mut guard = self.handle.lock().await;
        let channel = self.open_channel(&mut guard).await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| SshError::Sftp(format!("subsystem request failed: {}", e)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::Sftp(e.to_string()))?;
        let data = sftp
            .read(path)
            .await
            .map_err(|e| SshError::Sftp(format!("{}: {}", path, e)));
        let _ = sftp.close().await;
        data
    }

    /// Start `cmd` on a PTY channel and hand the channel over.
    ///
    /// The lock is held only while the channel is set up.
    pub async fn open_follow_channel(&self, cmd: &str) -> Result<Channel<Msg>, SshError> {
        let mut guard = self.handle.lock().await;
        let channel = self.open_channel(&mut guard).await?;
        channel
            .request_pty(false, "xterm", PTY_COLS, PTY_ROWS, 0, 0, &[])
            .await?;
        channel.exec(true, cmd).await?;
        debug!(target = %self.config.target(), "follow channel open");
        Ok(channel)
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!("disconnect: {}", e);
            }
            info!(target = %self.config.target(), "disconnected");
        }
    }

    // ========================================================================
    // Connection management
    // ========================================================================

    /// Open a session channel, reconnecting once if the connection went away
    async fn open_channel(
        &self,
        slot: &mut Option<Handle<ClientHandler>>,
    ) -> Result<Channel<Msg>, SshError> {
        let opened = self
            .ensure_connected(slot)
            .await?
            .channel_open_session()
            .await;
        match opened {
            Ok(channel) => Ok(channel),
            Err(e) => {
                warn!(target = %self.config.target(), "channel open failed ({}), reconnecting", e);
                *slot = None;
                let handle = self.ensure_connected(slot).await?;
                Ok(handle.channel_open_session().await?)
            }
        }
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Handle<ClientHandler>>,
    ) -> Result<&'a Handle<ClientHandler>, SshError> {
        let stale = match slot.as_ref() {
            None => true,
            Some(h) => h.is_closed(),
        };
        if stale {
            *slot = None;
            *slot = Some(self.establish().await?);
        }
        slot.as_ref().ok_or(SshError::Disconnected)
    }

    async fn establish(&self) -> Result<Handle<ClientHandler>, SshError> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        info!(target = %self.config.target(), "connecting");

        let handler = ClientHandler::new(host, port);
        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(self.ssh_config.clone(), (host, port), handler),
        )
        .await
        .map_err(|_| SshError::Timeout(CONNECT_TIMEOUT))?
        .map_err(|e| match e {
            SshError::HostKey(_) => e,
            other => SshError::ConnectionFailed(other.to_string()),
        })?;

        self.authenticate(&mut handle).await?;
        info!(target = %self.config.target(), "authenticated");
        Ok(handle)
    }

    /// Key first (password as fallback), then password alone, then default identities
    async fn authenticate(&self, handle: &mut Handle<ClientHandler>) -> Result<(), SshError> {
        let password = self.config.password.as_deref().filter(|p| !p.is_empty());

        if let Some(key_path) = &self.config.key_path {
            if self.try_key(handle, key_path).await? {
                return Ok(());
            }
            if let Some(pw) = password {
                debug!("public key rejected, trying password");
                if self.try_password(handle, pw).await? {
                    return Ok(());
                }
            }
            return Err(SshError::AuthenticationFailed(format!(
                "key {} rejected",
                key_path.display()
            )));
        }

        if let Some(pw) = password {
            if self.try_password(handle, pw).await? {
                return Ok(());
            }
            return Err(SshError::AuthenticationFailed("password rejected".into()));
        }

        let candidates = default_identities();
        for key_path in &candidates {
            match self.try_key(handle, key_path).await {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(SshError::KeyError(e)) => {
                    debug!("skipping {}: {}", key_path.display(), e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(SshError::AuthenticationFailed(format!(
            "no credentials accepted (tried {} default key(s))",
            candidates.len()
        )))
    }

    async fn try_key(
        &self,
        handle: &mut Handle<ClientHandler>,
        key_path: &Path,
    ) -> Result<bool, SshError> {
        let key = russh::keys::load_secret_key(key_path, None)?;
        let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
        let result = handle
            .authenticate_publickey(&self.config.user, key_with_hash)
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
        Ok(result.success())
    }

    async fn try_password(
        &self,
        handle: &mut Handle<ClientHandler>,
        password: &str,
    ) -> Result<bool, SshError> {
        let result = handle
            .authenticate_password(&self.config.user, password)
            .await
            .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?;
        Ok(result.success())
    }
}

/// Existing default identity files under `~/.ssh`
fn default_identities() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    DEFAULT_IDENTITIES
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|p| p.is_file())
        .collect()
}

/// Collects the output of one exec channel
#[derive(Default)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl Capture {
    /// Returns true once the channel is closed
    fn absorb(&mut self, msg: &ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => {
                self.stdout.extend_from_slice(data);
                false
            }
            ChannelMsg::ExtendedData { data, ext: 1 } => {
                self.stderr.extend_from_slice(data);
                false
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_status = Some(*exit_status);
                false
            }
            ChannelMsg::Close => true,
            _ => false,
        }
    }

    /// A channel that closed without reporting a status counts as failed
    fn into_result(self) -> ExecutionResult {
        ExecutionResult {
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            exit_status: self.exit_status.map(|c| c as i32).unwrap_or(-1),
        }
    }
}
