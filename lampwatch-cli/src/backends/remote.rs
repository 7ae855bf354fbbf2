use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelMsg};
use tracing::{debug, warn};

use lampwatch_core::backend::{ExecutionBackend, classify_search, parse_log_listing};
use lampwatch_core::command::{
    Elevation, build_cat, build_follow, build_list_dir, build_search, build_size, build_sudo,
    build_tail, build_truncate, redact,
};
use lampwatch_core::config::SessionConfig;
use lampwatch_core::follow::FollowStream;
use lampwatch_core::model::{ExecutionResult, LogFileEntry};
use lampwatch_core::paths;
use lampwatch_core::{BackendError, Result};

use crate::ssh::RemoteSession;

/// Runs everything on a remote host over one SSH session
pub struct RemoteBackend {
    session: Arc<RemoteSession>,
    elevation: Elevation,
    log_dir: String,
}

impl RemoteBackend {
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let elevation = Elevation::for_session(&config);
        let session = RemoteSession::connect(config).await?;
        Ok(Self {
            session: Arc::new(session),
            elevation,
            log_dir: paths::LOG_DIR.to_string(),
        })
    }

    pub fn session(&self) -> &Arc<RemoteSession> {
        &self.session
    }

    /// Elevated read whose "No such file" diagnostics become `NotFound`
    async fn read_elevated(&self, cmd: &str, path: &str) -> Result<String> {
        self.run(&build_sudo(cmd, &self.elevation))
            .await
            .map_err(|e| missing_as_not_found(e, path))
    }
}

fn missing_as_not_found(err: BackendError, path: &str) -> BackendError {
    if err.mentions_missing_file() {
        BackendError::not_found(path)
    } else {
        err
    }
}

/// Rows of a `find | sort` listing. `sort` masks `find`'s status, so a
/// diagnostic with no rows means the directory could not be read.
fn listing_from_result(dir: &str, result: ExecutionResult) -> Result<Vec<LogFileEntry>> {
    if result.stdout.trim().is_empty() && !result.stderr.trim().is_empty() {
        return Err(BackendError::DirectoryUnavailable {
            path: dir.to_string(),
            reason: result.stderr.trim().to_string(),
        });
    }
    // Unreadable subpaths only add stderr noise; the rows are still valid
    parse_log_listing(&result.stdout)
}

#[async_trait]
impl ExecutionBackend for RemoteBackend {
    fn name(&self) -> &str {
        "ssh"
    }

    fn elevation(&self) -> &Elevation {
        &self.elevation
    }

    fn log_dir(&self) -> &str {
        &self.log_dir
    }

    async fn execute(&self, cmd: &str) -> Result<ExecutionResult> {
        Ok(self.session.execute(cmd).await?)
    }

    async fn tail(&self, path: &str, lines: usize) -> Result<String> {
        self.read_elevated(&build_tail(path, lines), path).await
    }

    async fn size_bytes(&self, path: &str) -> Result<u64> {
        let out = self.read_elevated(&build_size(path), path).await?;
        out.trim().parse::<u64>().map_err(|_| BackendError::Parse {
            what: "file size".into(),
            raw: out.trim().to_string(),
        })
    }

    async fn search(
        &self,
        path: &str,
        pattern: &str,
        tail_lines: usize,
        max_hits: usize,
    ) -> Result<String> {
        let cmd = build_sudo(
            &build_search(path, pattern, tail_lines, max_hits),
            &self.elevation,
        );
        let result = self.execute(&cmd).await?;
        classify_search(&redact(&cmd, &self.elevation), path, result)
    }

    async fn truncate(&self, path: &str) -> Result<String> {
        self.size_bytes(path).await?;
        self.run_elevated(&build_truncate(path)).await?;
        Ok(format!("log truncated: {}", path))
    }

    /// Never creates the directory
    async fn list_log_dir(&self) -> Result<Vec<LogFileEntry>> {
        let cmd = build_list_dir(&self.log_dir);
        let result = self.execute(&cmd).await?;
        listing_from_result(&self.log_dir, result)
    }

    /// SFTP first, elevated `cat` as fallback.
    ///
    /// The fallback travels as text, so binary files may come back altered.
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<String> {
        match self.session.read_file(remote_path).await {
            Ok(bytes) => {
                tokio::fs::write(local_path, &bytes).await?;
                Ok(format!(
                    "downloaded {} to {} ({} bytes, sftp)",
                    remote_path,
                    local_path.display(),
                    bytes.len()
                ))
            }
            Err(e) => {
                warn!(path = remote_path, "sftp read failed ({}), falling back to cat", e);
                let text = self.read_elevated(&build_cat(remote_path), remote_path).await?;
                tokio::fs::write(local_path, text.as_bytes()).await?;
                Ok(format!(
                    "downloaded {} to {} ({} bytes, text fallback)",
                    remote_path,
                    local_path.display(),
                    text.len()
                ))
            }
        }
    }

    async fn open_follow(&self, path: &str) -> Result<Box<dyn FollowStream>> {
        if self.elevation.is_password() {
            return Err(BackendError::ElevationUnsupported);
        }
        let cmd = build_sudo(&build_follow(path), &self.elevation);
        debug!(cmd = %cmd, "opening follow channel");
        let channel = self.session.open_follow_channel(&cmd).await?;
        Ok(Box::new(ChannelFollow::new(channel)))
    }
}

/// Follow source backed by a PTY channel
struct ChannelFollow {
    channel: Channel<Msg>,
    exit_status: Option<i32>,
    closed: bool,
}

impl ChannelFollow {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            exit_status: None,
            closed: false,
        }
    }
}

#[async_trait]
impl FollowStream for ChannelFollow {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        while !self.closed {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(Some(data.to_vec())),
                // A PTY merges stderr already; keep anything that still arrives separately
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(Some(data.to_vec())),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_status = Some(exit_status as i32);
                }
                Some(ChannelMsg::Close) | None => self.closed = true,
                Some(_) => {}
            }
        }
        Ok(None)
    }

    fn exit_status(&mut self) -> Option<i32> {
        self.exit_status
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.channel.eof().await;
        self.channel
            .close()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))
    }
}
