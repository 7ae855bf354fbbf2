use russh::client;
use russh::keys::PublicKey;
use russh::keys::known_hosts::{check_known_hosts, learn_known_hosts};
use tracing::{debug, info, warn};

use super::error::SshError;

/// Verifies server keys against `~/.ssh/known_hosts`.
///
/// Unknown hosts are learned on first use; a changed key aborts the handshake.
pub struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        match check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => {
                debug!(host = %self.host, port = self.port, "host key verified");
                Ok(true)
            }
            Ok(false) => {
                info!(host = %self.host, port = self.port, "new host, adding key to known_hosts");
                if let Err(e) =
                    learn_known_hosts(&self.host, self.port, server_public_key)
                {
                    warn!("failed to save host key: {}", e);
                }
                Ok(true)
            }
            Err(e) => {
                warn!(host = %self.host, port = self.port, "host key rejected: {}", e);
                Err(SshError::HostKey(format!(
                    "{}:{}: {}. Remove the stale entry from ~/.ssh/known_hosts if the change is expected",
                    self.host, self.port, e
                )))
            }
        }
    }
}
