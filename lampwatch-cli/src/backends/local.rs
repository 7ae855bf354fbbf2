use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use lampwatch_core::backend::{ExecutionBackend, classify_search};
use lampwatch_core::command::{
    Elevation, build_follow, build_search, build_sudo, build_tail, build_truncate,
};
use lampwatch_core::config::SessionConfig;
use lampwatch_core::follow::FollowStream;
use lampwatch_core::model::{ExecutionResult, LogFileEntry};
use lampwatch_core::paths;
use lampwatch_core::{BackendError, Result};

const READ_BUFFER: usize = 8192;
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Runs commands as child processes on this machine
pub struct LocalBackend {
    elevation: Elevation,
    log_dir: String,
}

impl LocalBackend {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            elevation: Elevation::for_session(config),
            log_dir: paths::LOG_DIR.to_string(),
        }
    }

    /// Browse `dir` instead of `/var/log`
    #[cfg(test)]
    pub fn with_log_dir(mut self, dir: impl Into<String>) -> Self {
        self.log_dir = dir.into();
        self
    }
}

fn ensure_exists(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        Ok(())
    } else {
        Err(BackendError::not_found(path))
    }
}

fn format_mtime(modified: std::time::SystemTime) -> String {
    DateTime::<Local>::from(modified)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[async_trait]
impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn elevation(&self) -> &Elevation {
        &self.elevation
    }

    fn log_dir(&self) -> &str {
        &self.log_dir
    }

    async fn execute(&self, cmd: &str) -> Result<ExecutionResult> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code().unwrap_or(-1),
        })
    }

    async fn tail(&self, path: &str, lines: usize) -> Result<String> {
        ensure_exists(path)?;
        self.run(&build_tail(path, lines)).await
    }

    async fn size_bytes(&self, path: &str) -> Result<u64> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(BackendError::not_found(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn search(
        &self,
        path: &str,
        pattern: &str,
        tail_lines: usize,
        max_hits: usize,
    ) -> Result<String> {
        ensure_exists(path)?;
        let cmd = build_search(path, pattern, tail_lines, max_hits);
        let result = self.execute(&cmd).await?;
        classify_search(&cmd, path, result)
    }

    async fn truncate(&self, path: &str) -> Result<String> {
        ensure_exists(path)?;
        self.run_elevated(&build_truncate(path)).await?;
        Ok(format!("log truncated: {}", path))
    }

    async fn list_log_dir(&self) -> Result<Vec<LogFileEntry>> {
        let dir = Path::new(&self.log_dir);
        if !dir.is_dir() {
            return Err(BackendError::DirectoryUnavailable {
                path: self.log_dir.clone(),
                reason: "no such directory".into(),
            });
        }

        let unavailable = |e: std::io::Error| BackendError::DirectoryUnavailable {
            path: self.log_dir.clone(),
            reason: e.to_string(),
        };
        let mut read_dir = tokio::fs::read_dir(dir).await.map_err(unavailable)?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.map_err(unavailable)? {
            let Ok(meta) = tokio::fs::metadata(entry.path()).await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            entries.push(LogFileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size_bytes: meta.len(),
                modified_at: meta.modified().map(format_mtime).unwrap_or_default(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Plain copy keeping permissions and modification time
    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<String> {
        ensure_exists(remote_path)?;
        let src = PathBuf::from(remote_path);
        let dst = local_path.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
            let bytes = std::fs::copy(&src, &dst)?;
            let modified = std::fs::metadata(&src)?.modified()?;
            std::fs::OpenOptions::new()
                .write(true)
                .open(&dst)?
                .set_modified(modified)?;
            Ok(bytes)
        })
        .await
        .map_err(|e| BackendError::TransferFailed(e.to_string()))??;

        Ok(format!(
            "copied {} to {} ({} bytes)",
            remote_path,
            local_path.display(),
            copied
        ))
    }

    async fn open_follow(&self, path: &str) -> Result<Box<dyn FollowStream>> {
        ensure_exists(path)?;
        let cmd = format!("{} 2>&1", build_sudo(&build_follow(path), &self.elevation));

        let mut command = Command::new("sh");
        command.arg("-c").arg(&cmd);

        // Own process group so close() can take down sudo and tail together
        unsafe {
            command.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        command.stdout(Stdio::piped());
        command.stderr(Stdio::null());
        command.stdin(Stdio::null());

        let mut child = command.spawn()?;
        let pgid = child.id().map(|pid| pid as i32).unwrap_or(-1);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackendError::Io(std::io::Error::other("child stdout not captured")))?;

        debug!(cmd = %cmd, pgid, "follow process started");
        Ok(Box::new(ChildFollow {
            child,
            stdout,
            pgid,
            buf: vec![0; READ_BUFFER],
        }))
    }
}

/// Follow source backed by a local `tail -f` process group
struct ChildFollow {
    child: Child,
    stdout: ChildStdout,
    pgid: i32,
    buf: Vec<u8>,
}

#[async_trait]
impl FollowStream for ChildFollow {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let n = self.stdout.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }

    fn exit_status(&mut self) -> Option<i32> {
        self.child
            .try_wait()
            .ok()
            .flatten()
            .map(|status| status.code().unwrap_or(-1))
    }

    /// SIGTERM to the group, SIGKILL after a short grace period
    async fn close(&mut self) -> Result<()> {
        if self.exit_status().is_some() {
            return Ok(());
        }
        if self.pgid > 0 {
            unsafe {
                libc::killpg(self.pgid, libc::SIGTERM);
            }
            if tokio::time::timeout(TERM_GRACE, self.child.wait()).await.is_err() {
                unsafe {
                    libc::killpg(self.pgid, libc::SIGKILL);
                }
                self.child.wait().await?;
            }
        } else {
            self.child.kill().await?;
        }
        Ok(())
    }
}
