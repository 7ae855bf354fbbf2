mod logs;
mod ops;
mod status;

use std::io::{self, BufRead, Write};

use lampwatch_core::BackendError;
use lampwatch_core::config::SettingsError;

pub use logs::{
    run_download, run_follow, run_ls, run_search, run_size, run_tail, run_truncate,
};
pub use ops::{
    ActionArg, DbCommand, NginxCommand, PhpCommand, ServiceTarget, run_db, run_nginx, run_php,
    run_service,
};
pub use status::{run_status, run_watch};

/// Failure of a CLI command
#[derive(Debug)]
pub enum CliError {
    Backend(BackendError),
    Settings(SettingsError),
    Json(serde_json::Error),
    Io(io::Error),
    Usage(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "{}", e),
            Self::Settings(e) => write!(f, "settings: {}", e),
            Self::Json(e) => write!(f, "JSON output failed: {}", e),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Usage(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<BackendError> for CliError {
    fn from(e: BackendError) -> Self {
        CliError::Backend(e)
    }
}

impl From<SettingsError> for CliError {
    fn from(e: SettingsError) -> Self {
        CliError::Settings(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Json(e)
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}

pub type CliResult = Result<(), CliError>;

/// Ask before a destructive operation unless `--yes` was given
pub fn confirm(prompt: &str, yes: bool) -> io::Result<bool> {
    if yes {
        return Ok(true);
    }
    eprint!("{} [y/N] ", prompt);
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn print_text(text: &str) {
    let text = text.trim_end();
    if !text.is_empty() {
        println!("{}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }

    #[test]
    fn test_confirm_skips_prompt_with_yes() {
        assert!(confirm("Truncate /var/log/syslog?", true).unwrap());
    }
}
