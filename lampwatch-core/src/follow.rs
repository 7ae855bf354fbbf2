//! Live log following
//!
//! A [`LiveFollower`] owns at most one running follow. The backend supplies a
//! [`FollowStream`] (a local child process or a remote PTY channel); one pump
//! task turns its bytes into text chunks and pushes them to the consumer's
//! channel until the source ends or [`FollowHandle::stop`] is called.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::ExecutionBackend;
use crate::config::{FOLLOW_POLL_INTERVAL, FOLLOW_STOP_TIMEOUT};
use crate::error::Result;

/// Lifecycle of one follow
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FollowState {
    Idle,
    Starting,
    Streaming,
    Stopped,
    Failed(String),
}

impl FollowState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}

/// What the consumer receives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FollowEvent {
    /// Decoded output, in source order
    Chunk(String),
    /// The source failed mid-stream
    Error(String),
    /// The source ended on its own
    Ended { exit_status: Option<i32> },
}

/// Backend-specific byte source behind a follow
#[async_trait]
pub trait FollowStream: Send {
    /// Next block of raw output; `None` at end of stream
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Exit status once the source has exited, without blocking
    fn exit_status(&mut self) -> Option<i32>;

    /// Force the source down and release its resources
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// Incremental UTF-8 decoding
// ============================================================================

/// Decodes a byte stream that may split multi-byte characters across reads
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    /// Decode as much as possible; an incomplete trailing sequence is kept for the next call
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

// ============================================================================
// Handle
// ============================================================================

struct FollowInner {
    id: String,
    path: String,
    state: watch::Sender<FollowState>,
    cancel: watch::Sender<bool>,
    sink: Mutex<Option<mpsc::UnboundedSender<FollowEvent>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FollowInner {
    fn emit(&self, event: FollowEvent) {
        let guard = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(event);
        }
    }

    fn detach_sink(&self) {
        self.sink.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Move to `next` unless already terminal
    fn transition(&self, next: FollowState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Shared handle to one follow
#[derive(Clone)]
pub struct FollowHandle {
    inner: Arc<FollowInner>,
}

impl std::fmt::Debug for FollowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FollowHandle")
            .field("id", &self.inner.id)
            .field("path", &self.inner.path)
            .field("state", &self.state())
            .finish()
    }
}

impl FollowHandle {
    fn new(path: &str, sink: mpsc::UnboundedSender<FollowEvent>) -> (Self, watch::Receiver<bool>) {
        let (state, _) = watch::channel(FollowState::Idle);
        let (cancel, cancel_rx) = watch::channel(false);
        let inner = FollowInner {
            id: Uuid::new_v4().to_string(),
            path: path.to_string(),
            state,
            cancel,
            sink: Mutex::new(Some(sink)),
            task: tokio::sync::Mutex::new(None),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            cancel_rx,
        )
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn state(&self) -> FollowState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FollowState> {
        self.inner.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Stop the follow. Idempotent; nothing reaches the sink once this returns.
    pub async fn stop(&self) {
        self.inner.cancel.send_replace(true);
        self.inner.detach_sink();

        let task = self.inner.task.lock().await.take();
        if let Some(mut task) = task {
            match tokio::time::timeout(FOLLOW_STOP_TIMEOUT, &mut task).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(path = %self.inner.path, "follow teardown timed out, aborting pump");
                    task.abort();
                }
            }
        }
        self.inner.transition(FollowState::Stopped);
    }

    /// Wait until the follow reaches a terminal state
    pub async fn finished(&self) -> FollowState {
        let mut rx = self.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }
}

async fn pump(
    mut stream: Box<dyn FollowStream>,
    inner: Arc<FollowInner>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut check_interval = tokio::time::interval(FOLLOW_POLL_INTERVAL);
    check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut chunker = Utf8Chunker::default();
    let mut exit_status = None;
    let mut cancelled = false;

    loop {
        tokio::select! {
            biased;

            _ = cancel.changed() => {
                cancelled = true;
                break;
            }

            _ = check_interval.tick() => {
                // One full interval to drain after the source exited
                if exit_status.is_some() {
                    break;
                }
                exit_status = stream.exit_status();
            }

            chunk = stream.next_chunk() => match chunk {
                Ok(Some(bytes)) => {
                    let text = chunker.push(&bytes);
                    if !text.is_empty() {
                        inner.emit(FollowEvent::Chunk(text));
                    }
                }
                Ok(None) => {
                    if exit_status.is_none() {
                        exit_status = stream.exit_status();
                    }
                    break;
                }
                Err(e) => {
                    inner.emit(FollowEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }

    let rest = chunker.finish();
    if !rest.is_empty() {
        inner.emit(FollowEvent::Chunk(rest));
    }

    if let Err(e) = stream.close().await {
        debug!(path = %inner.path, error = %e, "follow close failed");
    }

    if !cancelled {
        debug!(path = %inner.path, ?exit_status, "follow source ended");
        inner.emit(FollowEvent::Ended { exit_status });
    }
    inner.transition(FollowState::Stopped);
}

// ============================================================================
// Follower
// ============================================================================

/// Owns the single active follow of one consumer
#[derive(Debug, Default)]
pub struct LiveFollower {
    current: Option<FollowHandle>,
}

impl LiveFollower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent handle, active or not
    pub fn handle(&self) -> Option<&FollowHandle> {
        self.current.as_ref()
    }

    /// Start following `path`. An active follow is returned as is.
    ///
    /// If the backend cannot open the source, the new handle ends in
    /// `Failed` and the error is returned.
    pub async fn start(
        &mut self,
        backend: &dyn ExecutionBackend,
        path: &str,
        sink: mpsc::UnboundedSender<FollowEvent>,
    ) -> Result<FollowHandle> {
        if let Some(handle) = &self.current {
            if handle.is_active() {
                return Ok(handle.clone());
            }
        }

        let (handle, cancel_rx) = FollowHandle::new(path, sink);
        handle.inner.transition(FollowState::Starting);
        self.current = Some(handle.clone());

        let stream = match backend.open_follow(path).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(backend = backend.name(), path, error = %e, "follow failed to start");
                handle.inner.transition(FollowState::Failed(e.to_string()));
                handle.inner.detach_sink();
                return Err(e);
            }
        };

        debug!(backend = backend.name(), path, id = handle.id(), "follow streaming");
        handle.inner.transition(FollowState::Streaming);
        let task = tokio::spawn(pump(stream, handle.inner.clone(), cancel_rx));
        *handle.inner.task.lock().await = Some(task);

        Ok(handle)
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = &self.current {
            handle.stop().await;
        }
    }
}
