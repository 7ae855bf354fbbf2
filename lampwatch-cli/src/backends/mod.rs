mod local;
mod remote;

use std::sync::Arc;

use tracing::info;

use lampwatch_core::config::{SessionConfig, SessionMode};
use lampwatch_core::{ExecutionBackend, Result};

use crate::ssh::RemoteSession;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// An open backend plus the SSH session behind it, if any
pub struct Connection {
    backend: Arc<dyn ExecutionBackend>,
    session: Option<Arc<RemoteSession>>,
}

impl Connection {
    pub fn backend(&self) -> &dyn ExecutionBackend {
        self.backend.as_ref()
    }

    pub async fn close(self) {
        if let Some(session) = self.session {
            session.disconnect().await;
        }
    }
}

/// Pick the backend for `config` and, for remote mode, open the session
pub async fn connect(config: &SessionConfig) -> Result<Connection> {
    config.validate()?;
    info!(target = %config.target(), "starting session");
    match config.mode {
        SessionMode::Local => Ok(Connection {
            backend: Arc::new(LocalBackend::new(config)),
            session: None,
        }),
        SessionMode::Remote => {
            let remote = RemoteBackend::connect(config.clone()).await?;
            let session = Arc::clone(remote.session());
            Ok(Connection {
                backend: Arc::new(remote),
                session: Some(session),
            })
        }
    }
}
