use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BackendError;

/// TCP connect plus SSH handshake budget
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the follow pump checks whether its source exited
pub const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Upper bound on follow teardown
pub const FOLLOW_STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// Default status refresh period
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Where commands run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Local,
    #[default]
    Remote,
}

/// Connection parameters for one session.
///
/// Local mode ignores every remote field. The password lives only in memory.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: SessionMode,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(skip)]
    pub password: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Private key for public-key auth
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Elevate with `sudo -n`
    #[serde(default = "default_true")]
    pub use_sudo_nopass: bool,
}

fn default_user() -> String {
    "pi".into()
}
fn default_port() -> u16 {
    22
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::default(),
            host: String::new(),
            user: default_user(),
            password: None,
            port: default_port(),
            key_path: None,
            use_sudo_nopass: true,
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("mode", &self.mode)
            .field("host", &self.host)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("port", &self.port)
            .field("key_path", &self.key_path)
            .field("use_sudo_nopass", &self.use_sudo_nopass)
            .finish()
    }
}

impl SessionConfig {
    pub fn local() -> Self {
        Self {
            mode: SessionMode::Local,
            ..Self::default()
        }
    }

    pub fn remote(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            mode: SessionMode::Remote,
            host: host.into(),
            user: user.into(),
            ..Self::default()
        }
    }

    pub fn is_local(&self) -> bool {
        self.mode == SessionMode::Local
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.mode == SessionMode::Remote {
            if self.host.trim().is_empty() {
                return Err(BackendError::InvalidConfig("remote mode requires a host".into()));
            }
            if self.user.trim().is_empty() {
                return Err(BackendError::InvalidConfig("remote mode requires a user".into()));
            }
        }
        Ok(())
    }

    /// `user@host:port`, or `local`
    pub fn target(&self) -> String {
        match self.mode {
            SessionMode::Local => "local".into(),
            SessionMode::Remote => format!("{}@{}:{}", self.user, self.host, self.port),
        }
    }
}

// ============================================================================
// Persisted settings
// ============================================================================

/// Settings file errors
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Operator preferences kept between runs
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default = "default_language")]
    pub language: String,

    /// Connection used last time; never carries the password
    #[serde(default)]
    pub last_connection: Option<SessionConfig>,
}

fn default_language() -> String {
    "en".into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: default_language(),
            last_connection: None,
        }
    }
}

pub const SETTINGS_ENV: &str = "LAMPWATCH_SETTINGS";
pub const SETTINGS_FILE: &str = "lampwatch.yaml";

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(content: &str) -> Result<Self, SettingsError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Settings path: `$LAMPWATCH_SETTINGS` if set, else `lampwatch.yaml` in `dir`
    pub fn path_in(dir: &Path) -> PathBuf {
        match std::env::var(SETTINGS_ENV) {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => dir.join(SETTINGS_FILE),
        }
    }

    /// Load settings from the discovered path; a missing file yields defaults
    pub fn discover(dir: &Path) -> Result<(PathBuf, Self), SettingsError> {
        let path = Self::path_in(dir);
        if !path.exists() {
            return Ok((path, Self::default()));
        }
        let settings = Self::load(&path)?;
        Ok((path, settings))
    }

    /// Remember `config` as the last connection
    pub fn remember(&mut self, config: &SessionConfig) {
        let mut saved = config.clone();
        saved.password = None;
        self.last_connection = Some(saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg: SessionConfig = serde_yaml::from_str("host: web01\n").unwrap();
        assert_eq!(cfg.mode, SessionMode::Remote);
        assert_eq!(cfg.user, "pi");
        assert_eq!(cfg.port, 22);
        assert!(cfg.use_sudo_nopass);
        assert!(cfg.password.is_none());
    }

    #[test]
    fn test_remote_requires_host() {
        let cfg = SessionConfig::remote("  ", "admin");
        assert!(matches!(cfg.validate(), Err(BackendError::InvalidConfig(_))));
        assert!(SessionConfig::local().validate().is_ok());
    }

    #[test]
    fn test_password_never_persisted() {
        let mut cfg = SessionConfig::remote("web01", "deploy");
        cfg.password = Some("hunter2".into());
        let mut settings = Settings::default();
        settings.remember(&cfg);

        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(!yaml.contains("hunter2"));
        assert!(!yaml.contains("password"));

        let back = Settings::from_str(&yaml).unwrap();
        let last = back.last_connection.unwrap();
        assert_eq!(last.host, "web01");
        assert!(last.password.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("lampwatch.yaml");
        let mut settings = Settings::default();
        settings.language = "tr".into();
        settings.remember(&SessionConfig::remote("db01", "root"));
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Settings::from_str("").unwrap(), Settings::default());
    }

    #[test]
    fn test_debug_hides_password() {
        let mut cfg = SessionConfig::remote("web01", "deploy");
        cfg.password = Some("hunter2".into());
        assert!(!format!("{:?}", cfg).contains("hunter2"));
    }
}
