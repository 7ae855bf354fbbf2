//! The execution contract shared by the local and the SSH backends
//!
//! Implementors supply a handful of primitives (`execute`, file reads, follow).
//! Everything composed from those, service probes and the database
//! diagnostics included, lives here as default methods so both targets behave
//! the same way.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::command::{
    Elevation, build_is_active, build_service_action, build_service_status, build_sudo,
    build_tail, build_truncate_glob, redact, sh_quote,
};
use crate::error::{BackendError, Result};
use crate::follow::FollowStream;
use crate::model::{ExecutionResult, LogFileEntry, OperationOutcome, ServiceAction, ServiceKind};
use crate::paths;

pub const DEFAULT_SEARCH_TAIL: usize = 5000;
pub const DEFAULT_MAX_HITS: usize = 300;

/// Returned by grep-style probes that matched nothing
pub const NO_MATCHES: &str = "(no matches)";

const DB_NGINX_PATTERN: &str = "php|fastcgi|mysqli|pdo|sql|mysql|mariadb|denied|permission";
const DB_VARLOG_PATTERN: &str = "SQLSTATE|mysql|mysqli|pdo";

/// Runs commands against one target host.
///
/// Only the required methods differ between targets:
/// - `LocalBackend`: child processes on this machine
/// - `RemoteBackend`: channels on a persistent SSH session
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &str;

    fn elevation(&self) -> &Elevation;

    /// Directory browsed by `list_log_dir`
    fn log_dir(&self) -> &str;

    /// Run `cmd` through a shell and capture its output. Never fails on exit status.
    async fn execute(&self, cmd: &str) -> Result<ExecutionResult>;

    async fn tail(&self, path: &str, lines: usize) -> Result<String>;

    async fn size_bytes(&self, path: &str) -> Result<u64>;

    /// `grep -n` style hits among the last `tail_lines` lines
    async fn search(
        &self,
        path: &str,
        pattern: &str,
        tail_lines: usize,
        max_hits: usize,
    ) -> Result<String>;

    /// Empty the file in place (elevated)
    async fn truncate(&self, path: &str) -> Result<String>;

    async fn list_log_dir(&self) -> Result<Vec<LogFileEntry>>;

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<String>;

    /// Open a `tail -f` style source for `path`
    async fn open_follow(&self, path: &str) -> Result<Box<dyn FollowStream>>;

    // ========================================================================
    // Shared composition
    // ========================================================================

    /// Execute and classify the result
    async fn run(&self, cmd: &str) -> Result<String> {
        let logged = redact(cmd, self.elevation());
        debug!(backend = self.name(), cmd = %logged, "run");
        let result = self.execute(cmd).await?;
        classify_output(&logged, result)
    }

    async fn run_elevated(&self, cmd: &str) -> Result<String> {
        let full = build_sudo(cmd, self.elevation());
        Ok(self.run(&full).await?.trim().to_string())
    }

    async fn try_truncate(&self, path: &str) -> OperationOutcome {
        match self.truncate(path).await {
            Ok(message) => OperationOutcome::ok(message),
            Err(e) => OperationOutcome::failed(e.to_string()),
        }
    }

    /// Raw version banner of `kind`
    async fn get_service_version(&self, kind: ServiceKind) -> Result<String> {
        match kind {
            ServiceKind::Nginx => self.nginx_version().await,
            ServiceKind::PhpFpm => self.php_version().await,
            ServiceKind::Database => self.db_version().await,
        }
    }

    /// `nginx -v` from the first binary that answers, plain then elevated
    async fn nginx_version(&self) -> Result<String> {
        for bin in paths::NGINX_BINARIES {
            let probe = format!("{} -v 2>&1", bin);
            let mut attempts = vec![probe.clone()];
            if *self.elevation() != Elevation::None {
                attempts.push(build_sudo(&probe, self.elevation()));
            }
            for cmd in attempts {
                let result = self.execute(&cmd).await?;
                let text = result.text().trim();
                if result.success() && text.to_lowercase().contains("nginx") {
                    let version = text.strip_prefix("nginx version:").unwrap_or(text);
                    return Ok(version.trim().to_string());
                }
            }
        }
        Err(BackendError::not_found("nginx"))
    }

    /// First line of `php -v`
    async fn php_version(&self) -> Result<String> {
        let result = self.execute("php -v").await?;
        let first = result.stdout.lines().next().unwrap_or("").trim();
        if !result.success() || first.is_empty() {
            return Err(BackendError::not_found("php"));
        }
        Ok(first.to_string())
    }

    /// Raw `systemctl is-active` answer, whatever the exit status
    async fn get_service_activity(&self, service: &str) -> Result<String> {
        let result = self.execute(&build_is_active(service)).await?;
        Ok(result.text().trim().to_string())
    }

    async fn control_service(&self, service: &str, action: ServiceAction) -> Result<String> {
        self.run_elevated(&build_service_action(service, action)).await?;
        Ok(format!("{} {}: ok", service, action))
    }

    /// `nginx -t` output; a failed test is reported as text, not as an error
    async fn check_nginx_config(&self) -> Result<String> {
        let result = self.execute(&build_sudo("nginx -t 2>&1", self.elevation())).await?;
        Ok(format!("{}{}", result.stdout, result.stderr).trim().to_string())
    }

    async fn list_web_root(&self) -> Result<String> {
        self.run(&format!("ls -lh {}", sh_quote(paths::WEB_ROOT))).await
    }

    /// PHP lines of the nginx error log
    async fn check_php_errors(&self) -> Result<String> {
        let cmd = format!(
            "grep -i php {} | tail -n 200",
            sh_quote(paths::NGINX_ERROR_LOG)
        );
        self.grep_probe(&cmd).await
    }

    /// Elevated grep pipeline where "nothing matched" is a valid answer
    async fn grep_probe(&self, cmd: &str) -> Result<String> {
        let full = build_sudo(cmd, self.elevation());
        let result = self.execute(&full).await?;
        if !result.stdout.trim().is_empty() {
            return Ok(result.stdout.trim_end().to_string());
        }
        if result.stderr.trim().is_empty() {
            return Ok(NO_MATCHES.to_string());
        }
        classify_output(&redact(&full, self.elevation()), result)
            .map(|s| s.trim_end().to_string())
    }

    // ========================================================================
    // Database diagnostics
    // ========================================================================

    async fn db_version(&self) -> Result<String> {
        match self.run_elevated("mysql --version || mariadb --version").await {
            Ok(v) if !v.is_empty() => Ok(v),
            Ok(_) => Err(BackendError::not_found("mysql")),
            Err(BackendError::OperationFailed { exit_status: 127, .. }) => {
                Err(BackendError::not_found("mysql"))
            }
            Err(e) => Err(e),
        }
    }

    /// Full `systemctl status` text of the detected unit
    async fn db_status(&self) -> Result<String> {
        let service = self.db_service_name().await?;
        let cmd = build_sudo(&build_service_status(&service), self.elevation());
        let result = self.execute(&cmd).await?;
        Ok(result.text().trim_end().to_string())
    }

    /// First of `mariadb`, `mysql` present in the unit list
    async fn db_service_name(&self) -> Result<String> {
        for candidate in paths::DB_SERVICE_CANDIDATES {
            let cmd = format!(
                "systemctl list-units --type=service --all | grep -F {}",
                sh_quote(candidate)
            );
            let result = self.execute(&cmd).await?;
            if result.success() && !result.stdout.trim().is_empty() {
                return Ok(candidate.to_string());
            }
        }
        Ok(paths::DEFAULT_DB_SERVICE.to_string())
    }

    async fn db_port_check(&self) -> Result<String> {
        self.grep_probe(&format!("ss -lntp | grep {}", paths::DB_PORT)).await
    }

    async fn db_socket_check(&self) -> Result<String> {
        let cmd = paths::DB_SOCKET_DIRS
            .iter()
            .map(|dir| format!("ls -lh {}", sh_quote(dir)))
            .collect::<Vec<_>>()
            .join(" || ");
        self.run_elevated(&cmd).await
    }

    /// Last 200 lines of the first database log that has any
    async fn db_error_log(&self) -> Result<String> {
        for path in paths::DB_ERROR_LOGS {
            match self.run_elevated(&build_tail(path, 200)).await {
                Ok(text) if !text.is_empty() => return Ok(text),
                Ok(_) | Err(BackendError::OperationFailed { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(BackendError::not_found(paths::DB_ERROR_LOGS.join(", ")))
    }

    async fn db_bind_address(&self) -> Result<String> {
        let targets = paths::DB_CONFIG_PATHS
            .iter()
            .map(|p| sh_quote(p))
            .collect::<Vec<_>>()
            .join(" ");
        self.grep_probe(&format!("grep -Rin bind-address {} 2>/dev/null", targets))
            .await
    }

    async fn db_errors_in_nginx(&self) -> Result<String> {
        let cmd = format!(
            "grep -Ei {} {} | tail -n 200",
            sh_quote(DB_NGINX_PATTERN),
            sh_quote(paths::NGINX_ERROR_LOG)
        );
        self.grep_probe(&cmd).await
    }

    async fn db_errors_in_varlog(&self) -> Result<String> {
        let cmd = format!(
            "grep -RinE {} {} 2>/dev/null | head -n 50",
            sh_quote(DB_VARLOG_PATTERN),
            sh_quote(paths::LOG_DIR)
        );
        self.grep_probe(&cmd).await
    }

    async fn truncate_nginx_logs(&self) -> OperationOutcome {
        let result = self.run_elevated(&build_truncate_glob(paths::NGINX_LOG_GLOB)).await;
        outcome(result, "nginx logs truncated")
    }

    async fn truncate_php_logs(&self) -> OperationOutcome {
        let result = self.run_elevated(&build_truncate_glob(paths::PHP_FPM_LOG_GLOB)).await;
        outcome(result, "PHP-FPM logs truncated")
    }

    async fn truncate_db_logs(&self) -> OperationOutcome {
        let targets = paths::DB_ERROR_LOGS
            .iter()
            .map(|p| sh_quote(p))
            .collect::<Vec<_>>()
            .join(" ");
        let result = self.run_elevated(&build_truncate_glob(&targets)).await;
        outcome(result, "database logs truncated")
    }
}

fn outcome(result: Result<String>, done: &str) -> OperationOutcome {
    match result {
        Ok(text) if text.is_empty() => OperationOutcome::ok(done),
        Ok(text) => OperationOutcome::ok(format!("{}\n{}", done, text)),
        Err(e) => OperationOutcome::failed(e.to_string()),
    }
}

/// Turn a raw result into a payload or a typed failure.
///
/// - exit != 0: `OperationFailed` with stderr (stdout if stderr is empty)
/// - exit == 0, stdout empty, stderr set: stderr is the payload
/// - otherwise stdout
pub fn classify_output(command: &str, result: ExecutionResult) -> Result<String> {
    if result.exit_status != 0 {
        let output = if result.stderr.trim().is_empty() {
            result.stdout
        } else {
            result.stderr
        };
        return Err(BackendError::OperationFailed {
            command: command.to_string(),
            exit_status: result.exit_status,
            output: output.trim().to_string(),
        });
    }
    if result.stdout.trim().is_empty() && !result.stderr.trim().is_empty() {
        return Ok(result.stderr);
    }
    Ok(result.stdout)
}

/// Classify a `tail | grep | head` search pipeline.
///
/// The pipeline reports `head`'s status, so a failing `tail` only shows up
/// as stderr with nothing on stdout.
pub fn classify_search(command: &str, path: &str, result: ExecutionResult) -> Result<String> {
    if result.stdout.trim().is_empty() && !result.stderr.trim().is_empty() {
        if result.stderr.to_lowercase().contains("no such file") {
            return Err(BackendError::not_found(path));
        }
        return Err(BackendError::OperationFailed {
            command: command.to_string(),
            exit_status: result.exit_status,
            output: result.stderr.trim().to_string(),
        });
    }
    if result.exit_status != 0 {
        return classify_output(command, result);
    }
    Ok(result.stdout)
}

/// Parse `name\tsize\tYYYY-MM-DD HH:MM` rows into entries sorted by name
pub fn parse_log_listing(raw: &str) -> Result<Vec<LogFileEntry>> {
    let mut entries = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let mut parts = line.splitn(3, '\t');
        let (Some(name), Some(size), Some(modified)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(BackendError::Parse {
                what: "log listing".into(),
                raw: line.to_string(),
            });
        };
        let size_bytes = size.trim().parse::<u64>().map_err(|_| BackendError::Parse {
            what: "file size".into(),
            raw: line.to_string(),
        })?;
        entries.push(LogFileEntry {
            name: name.to_string(),
            size_bytes,
            modified_at: modified.trim().to_string(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    #[test]
    fn test_classify_nonzero_prefers_stderr() {
        let err = classify_output("x", ExecutionResult::new("partial", "boom\n", 2)).unwrap_err();
        match err {
            BackendError::OperationFailed {
                exit_status,
                output,
                ..
            } => {
                assert_eq!(exit_status, 2);
                assert_eq!(output, "boom");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = classify_output("x", ExecutionResult::new("only stdout", "", 1)).unwrap_err();
        assert!(err.to_string().contains("only stdout"));
    }

    #[test]
    fn test_classify_zero_exit() {
        assert_eq!(
            classify_output("x", ExecutionResult::new("", "nginx version: nginx/1.24.0", 0)).unwrap(),
            "nginx version: nginx/1.24.0"
        );
        assert_eq!(
            classify_output("x", ExecutionResult::new("out", "warn", 0)).unwrap(),
            "out"
        );
    }

    #[test]
    fn test_classify_search() {
        let hits = ExecutionResult::new("3:ERROR disk full\n", "", 0);
        assert_eq!(
            classify_search("x", "/var/log/syslog", hits).unwrap(),
            "3:ERROR disk full\n"
        );
        assert_eq!(
            classify_search("x", "/var/log/syslog", ExecutionResult::default()).unwrap(),
            ""
        );

        let denied = ExecutionResult::new(
            "",
            "tail: cannot open '/var/log/syslog' for reading: Permission denied\n",
            0,
        );
        match classify_search("x", "/var/log/syslog", denied).unwrap_err() {
            BackendError::OperationFailed { output, .. } => {
                assert!(output.contains("Permission denied"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let missing = ExecutionResult::new(
            "",
            "tail: cannot open '/var/log/nope' for reading: No such file or directory\n",
            0,
        );
        assert!(matches!(
            classify_search("x", "/var/log/nope", missing),
            Err(BackendError::NotFound { path }) if path == "/var/log/nope"
        ));
    }

    #[test]
    fn test_parse_log_listing() {
        let raw = "syslog\t2048\t2024-01-01 10:00\nauth.log\t0\t2024-01-02 08:30\n";
        let entries = parse_log_listing(raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "auth.log");
        assert_eq!(entries[1].size_bytes, 2048);
        assert_eq!(entries[1].modified_at, "2024-01-01 10:00");

        assert!(matches!(
            parse_log_listing("broken line"),
            Err(BackendError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_nginx_version_falls_through_binaries() {
        let backend = ScriptedBackend::new()
            .on("/usr/sbin/nginx -v", "nginx version: nginx/1.24.0 (Ubuntu)\n", "", 0);
        let v = backend.get_service_version(ServiceKind::Nginx).await.unwrap();
        assert_eq!(v, "nginx/1.24.0 (Ubuntu)");
        // plain `nginx` was probed first
        assert!(backend.executed()[0].starts_with("nginx -v"));
    }

    #[tokio::test]
    async fn test_nginx_version_not_found() {
        let backend = ScriptedBackend::new();
        let err = backend.get_service_version(ServiceKind::Nginx).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_php_version_first_line() {
        let backend = ScriptedBackend::new().on(
            "php -v",
            "PHP 8.2.7 (cli) (built: Jun  9 2023)\nCopyright (c) The PHP Group\n",
            "",
            0,
        );
        assert_eq!(
            backend.get_service_version(ServiceKind::PhpFpm).await.unwrap(),
            "PHP 8.2.7 (cli) (built: Jun  9 2023)"
        );
    }

    #[tokio::test]
    async fn test_activity_returns_text_on_failure() {
        let backend = ScriptedBackend::new().on("is-active 'nginx'", "inactive\n", "", 3);
        assert_eq!(backend.get_service_activity("nginx").await.unwrap(), "inactive");
    }

    #[tokio::test]
    async fn test_control_service_failure_keeps_diagnostics() {
        let backend = ScriptedBackend::new().on(
            "systemctl restart 'nginx'",
            "",
            "Job for nginx.service failed because the control process exited with error code.",
            1,
        );
        let err = backend
            .control_service("nginx", ServiceAction::Restart)
            .await
            .unwrap_err();
        match err {
            BackendError::OperationFailed {
                command,
                exit_status,
                output,
            } => {
                assert_eq!(command, "sudo -n systemctl restart 'nginx'");
                assert_eq!(exit_status, 1);
                assert!(output.starts_with("Job for nginx.service failed"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_db_service_name_detection() {
        let backend = ScriptedBackend::new().on(
            "grep -F 'mysql'",
            "  mysql.service loaded active running MySQL Community Server\n",
            "",
            0,
        );
        assert_eq!(backend.db_service_name().await.unwrap(), "mysql");

        let backend = ScriptedBackend::new().on("grep -F 'mariadb'", "", "", 1);
        assert_eq!(backend.db_service_name().await.unwrap(), "mariadb");
    }

    #[tokio::test]
    async fn test_db_status_uses_detected_unit() {
        let backend = ScriptedBackend::new()
            .on("grep -F 'mariadb'", "mariadb.service loaded active running\n", "", 0)
            .on(
                "systemctl status 'mariadb'",
                "● mariadb.service - MariaDB 10.11.6 database server\n   Active: active (running)\n",
                "",
                0,
            );
        let status = backend.db_status().await.unwrap();
        assert!(status.contains("Active: active (running)"));
    }

    #[tokio::test]
    async fn test_grep_probe_no_match_is_placeholder() {
        let backend = ScriptedBackend::new().on("grep -Rin bind-address", "", "", 1);
        assert_eq!(backend.db_bind_address().await.unwrap(), NO_MATCHES);

        let backend = ScriptedBackend::new().on(
            "grep -Rin bind-address",
            "/etc/mysql/mariadb.conf.d/50-server.cnf:27:bind-address = 127.0.0.1\n",
            "",
            2,
        );
        assert!(backend.db_bind_address().await.unwrap().ends_with("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_grep_probe_sudo_failure_is_error() {
        let backend = ScriptedBackend::new().on("ss -lntp", "", "sudo: a password is required", 1);
        let err = backend.db_port_check().await.unwrap_err();
        assert!(err.to_string().contains("a password is required"));
    }

    #[tokio::test]
    async fn test_db_error_log_falls_back_to_mariadb() {
        let backend = ScriptedBackend::new()
            .on("'/var/log/mysql/error.log'", "", "tail: cannot open", 1)
            .on(
                "'/var/log/mariadb/mariadb.log'",
                "2024-01-01 10:00:00 0 [Note] InnoDB: Buffer pool(s) load completed\n",
                "",
                0,
            );
        let log = backend.db_error_log().await.unwrap();
        assert!(log.contains("InnoDB"));
    }

    #[tokio::test]
    async fn test_db_version_missing_client() {
        let backend = ScriptedBackend::new().on(
            "mysql --version",
            "",
            "sh: 1: mariadb: not found",
            127,
        );
        assert!(matches!(
            backend.db_version().await,
            Err(BackendError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncate_outcomes() {
        let backend = ScriptedBackend::new()
            .on("/var/log/nginx/*.log", "", "", 0)
            .on("php*-fpm.log", "", "truncate: cannot open '/var/log/php*-fpm.log'", 1);
        let ok = backend.truncate_nginx_logs().await;
        assert!(ok.success);
        assert_eq!(ok.message, "nginx logs truncated");
        let failed = backend.truncate_php_logs().await;
        assert!(!failed.success);
        assert!(failed.message.contains("cannot open"));
    }

    #[tokio::test]
    async fn test_password_is_redacted_in_errors() {
        let backend = ScriptedBackend::new()
            .with_elevation(Elevation::Password("hunter2".into()))
            .on("systemctl stop", "", "Sorry, try again.", 1);
        let err = backend
            .control_service("nginx", ServiceAction::Stop)
            .await
            .unwrap_err();
        assert!(!format!("{:?}", err).contains("hunter2"));
    }
}
