//! In-memory backend that answers commands from a script

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{ExecutionBackend, classify_output, classify_search, parse_log_listing};
use crate::command::{
    Elevation, build_cat, build_list_dir, build_search, build_size, build_tail, build_truncate,
};
use crate::error::{BackendError, Result};
use crate::follow::FollowStream;
use crate::model::{ExecutionResult, LogFileEntry};

/// Commands are matched against rules by substring, first rule wins.
/// Anything unmatched answers like a missing binary (exit 127).
pub struct ScriptedBackend {
    rules: Vec<(String, ExecutionResult)>,
    elevation: Elevation,
    executed: Mutex<Vec<String>>,
    follow: Mutex<Option<ScriptedFollow>>,
    follow_error: Mutex<Option<BackendError>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            elevation: Elevation::NonInteractive,
            executed: Mutex::new(Vec::new()),
            follow: Mutex::new(None),
            follow_error: Mutex::new(None),
        }
    }

    pub fn on(mut self, needle: &str, stdout: &str, stderr: &str, exit_status: i32) -> Self {
        self.rules.push((
            needle.to_string(),
            ExecutionResult::new(stdout, stderr, exit_status),
        ));
        self
    }

    pub fn with_elevation(mut self, elevation: Elevation) -> Self {
        self.elevation = elevation;
        self
    }

    pub fn with_follow(self, follow: ScriptedFollow) -> Self {
        *self.follow.lock().unwrap() = Some(follow);
        self
    }

    pub fn fail_follow(&self, err: BackendError) {
        *self.follow_error.lock().unwrap() = Some(err);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn elevation(&self) -> &Elevation {
        &self.elevation
    }

    fn log_dir(&self) -> &str {
        "/var/log"
    }

    async fn execute(&self, cmd: &str) -> Result<ExecutionResult> {
        self.executed.lock().unwrap().push(cmd.to_string());
        let hit = self
            .rules
            .iter()
            .find(|(needle, _)| cmd.contains(needle.as_str()))
            .map(|(_, result)| result.clone());
        Ok(hit.unwrap_or_else(|| ExecutionResult::new("", "sh: 1: not found", 127)))
    }

    async fn tail(&self, path: &str, lines: usize) -> Result<String> {
        self.run(&build_tail(path, lines)).await
    }

    async fn size_bytes(&self, path: &str) -> Result<u64> {
        let out = self.run(&build_size(path)).await?;
        out.trim().parse().map_err(|_| BackendError::Parse {
            what: "file size".into(),
            raw: out,
        })
    }

    async fn search(
        &self,
        path: &str,
        pattern: &str,
        tail_lines: usize,
        max_hits: usize,
    ) -> Result<String> {
        let cmd = build_search(path, pattern, tail_lines, max_hits);
        let result = self.execute(&cmd).await?;
        classify_search(&cmd, path, result)
    }

    async fn truncate(&self, path: &str) -> Result<String> {
        self.run_elevated(&build_truncate(path)).await?;
        Ok(format!("truncated {}", path))
    }

    async fn list_log_dir(&self) -> Result<Vec<LogFileEntry>> {
        let cmd = build_list_dir(self.log_dir());
        let result = self.execute(&cmd).await?;
        parse_log_listing(&classify_output(&cmd, result)?)
    }

    async fn download_file(&self, remote_path: &str, _local_path: &Path) -> Result<String> {
        self.run_elevated(&build_cat(remote_path)).await
    }

    async fn open_follow(&self, _path: &str) -> Result<Box<dyn FollowStream>> {
        if let Some(err) = self.follow_error.lock().unwrap().take() {
            return Err(err);
        }
        let follow = self.follow.lock().unwrap().take();
        match follow {
            Some(f) => Ok(Box::new(f)),
            None => Err(BackendError::not_found("follow")),
        }
    }
}

/// Scripted follow source
pub struct ScriptedFollow {
    chunks: VecDeque<Vec<u8>>,
    repeat: Option<Vec<u8>>,
    exit_status: Option<i32>,
    done: bool,
}

impl ScriptedFollow {
    /// Emit `chunks` then exit with `exit_status`
    pub fn finite(chunks: Vec<&str>, exit_status: i32) -> Self {
        Self {
            chunks: chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect(),
            repeat: None,
            exit_status: Some(exit_status),
            done: false,
        }
    }

    /// Emit `line` every 10ms until closed
    pub fn endless(line: &str) -> Self {
        Self {
            chunks: VecDeque::new(),
            repeat: Some(line.as_bytes().to_vec()),
            exit_status: None,
            done: false,
        }
    }
}

#[async_trait]
impl FollowStream for ScriptedFollow {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(chunk));
        }
        match &self.repeat {
            Some(line) if !self.done => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Some(line.clone()))
            }
            _ => {
                self.done = true;
                Ok(None)
            }
        }
    }

    fn exit_status(&mut self) -> Option<i32> {
        if self.done || self.chunks.is_empty() && self.repeat.is_none() {
            self.exit_status
        } else {
            None
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.done = true;
        Ok(())
    }
}
