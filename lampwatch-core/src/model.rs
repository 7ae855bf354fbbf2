use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// Captured output of one command execution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl ExecutionResult {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_status: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// stdout if it carries anything, stderr otherwise
    pub fn text(&self) -> &str {
        if self.stdout.trim().is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

/// One regular file directly under the log directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogFileEntry {
    pub name: String,
    pub size_bytes: u64,
    /// `YYYY-MM-DD HH:MM`
    pub modified_at: String,
}

/// Lifecycle verb passed to systemctl
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Reload => "reload",
        }
    }

    /// Whether the action interrupts a running service
    pub fn is_disruptive(&self) -> bool {
        matches!(self, Self::Stop | Self::Restart)
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            "reload" => Ok(Self::Reload),
            other => Err(format!("unknown service action: {}", other)),
        }
    }
}

/// The three managed services of a LAMP host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceKind {
    Nginx,
    PhpFpm,
    Database,
}

impl ServiceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Nginx => "nginx",
            Self::PhpFpm => "php-fpm",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classified `systemctl is-active` answer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    Active,
    Inactive,
    Unknown,
    NotFound,
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Unknown => "unknown",
            Self::NotFound => "not found",
        };
        f.write_str(s)
    }
}

/// Short version extracted from a raw banner
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortVersion {
    Parsed(String),
    Unparsed,
}

impl ShortVersion {
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Parsed(v) => Some(v),
            Self::Unparsed => None,
        }
    }
}

impl fmt::Display for ShortVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed(v) => f.write_str(v),
            Self::Unparsed => f.write_str("?"),
        }
    }
}

/// Snapshot of one service, recomputed on every refresh
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceStatusReport {
    pub service: ServiceKind,
    /// Banner as printed by the binary, or the lookup error text
    pub version_raw: String,
    pub version_short: ShortVersion,
    /// systemd unit, when it could be determined
    pub service_name: Option<String>,
    pub activity: ActivityState,
}

/// Structured result of a destructive operation
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    pub message: String,
}

impl OperationOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_action_parse() {
        assert_eq!("Restart".parse::<ServiceAction>(), Ok(ServiceAction::Restart));
        assert_eq!("reload".parse::<ServiceAction>(), Ok(ServiceAction::Reload));
        assert!("enable".parse::<ServiceAction>().is_err());
        assert!(ServiceAction::Stop.is_disruptive());
        assert!(!ServiceAction::Reload.is_disruptive());
    }

    #[test]
    fn test_execution_result_text_prefers_stdout() {
        let r = ExecutionResult::new("", "nginx version: nginx/1.24.0\n", 0);
        assert_eq!(r.text(), "nginx version: nginx/1.24.0\n");
        let r = ExecutionResult::new("active\n", "warning", 0);
        assert_eq!(r.text(), "active\n");
    }
}
