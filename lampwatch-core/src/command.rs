//! Shell command rendering
//!
//! Pure functions that turn a logical operation into a command line and wrap
//! it in the session's privilege escalation. Nothing here touches a process.

use crate::config::{SessionConfig, SessionMode};

/// How elevated commands obtain root
#[derive(Clone, PartialEq, Eq)]
pub enum Elevation {
    /// Run as the session user
    None,
    /// `sudo -n`, fails immediately if sudo wants a password
    NonInteractive,
    /// Password fed to `sudo -S` on stdin
    Password(String),
}

impl std::fmt::Debug for Elevation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::NonInteractive => f.write_str("NonInteractive"),
            Self::Password(_) => f.write_str("Password(***)"),
        }
    }
}

impl Elevation {
    pub fn for_session(config: &SessionConfig) -> Self {
        if config.use_sudo_nopass {
            return Self::NonInteractive;
        }
        match (&config.mode, &config.password) {
            (SessionMode::Remote, Some(pw)) if !pw.is_empty() => Self::Password(pw.clone()),
            _ => Self::None,
        }
    }

    pub fn is_password(&self) -> bool {
        matches!(self, Self::Password(_))
    }
}

/// Single-quote `arg` for a POSIX shell
pub fn sh_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

const SHELL_META: &[char] = &['|', ';', '&', '>', '<', '*', '?', '$', '`', '(', ')', '\n'];

/// Whether `cmd` needs a shell of its own to run as one unit under sudo
pub fn is_compound(cmd: &str) -> bool {
    cmd.contains(SHELL_META)
}

/// Apply `elevation` to `cmd`
pub fn build_sudo(cmd: &str, elevation: &Elevation) -> String {
    let target = if is_compound(cmd) {
        format!("sh -c {}", sh_quote(cmd))
    } else {
        cmd.to_string()
    };
    match elevation {
        Elevation::None => cmd.to_string(),
        Elevation::NonInteractive => format!("sudo -n {}", target),
        Elevation::Password(pw) => {
            format!("printf '%s\\n' {} | sudo -S -p '' {}", sh_quote(pw), target)
        }
    }
}

/// Mask the sudo password so the command can be logged
pub fn redact(cmd: &str, elevation: &Elevation) -> String {
    match elevation {
        Elevation::Password(pw) if !pw.is_empty() => cmd.replace(&sh_quote(pw), "'***'"),
        _ => cmd.to_string(),
    }
}

pub fn build_tail(path: &str, lines: usize) -> String {
    format!("tail -n {} {}", lines, sh_quote(path))
}

/// Last `tail_lines` lines, case-insensitive fixed-string match, at most `max_hits`
pub fn build_search(path: &str, pattern: &str, tail_lines: usize, max_hits: usize) -> String {
    format!(
        "{} | grep -n -i -F --color=never -e {} | head -n {}",
        build_tail(path, tail_lines),
        sh_quote(pattern),
        max_hits
    )
}

/// `-c` so a vanished file is not recreated
pub fn build_truncate(path: &str) -> String {
    format!("truncate -c -s 0 {}", sh_quote(path))
}

/// Truncate every file matched by `glob`; the pattern is left for the shell to expand
pub fn build_truncate_glob(glob: &str) -> String {
    format!("truncate -c -s 0 {}", glob)
}

pub fn build_service_action(service: &str, action: crate::model::ServiceAction) -> String {
    format!("systemctl {} {}", action.as_str(), sh_quote(service))
}

pub fn build_is_active(service: &str) -> String {
    format!("systemctl is-active {}", sh_quote(service))
}

pub fn build_service_status(service: &str) -> String {
    format!("systemctl status {} --no-pager", sh_quote(service))
}

pub fn build_size(path: &str) -> String {
    format!("stat -c %s {}", sh_quote(path))
}

pub fn build_cat(path: &str) -> String {
    format!("cat {}", sh_quote(path))
}

pub fn build_follow(path: &str) -> String {
    format!("tail -f {}", sh_quote(path))
}

/// One `name\tsize\tYYYY-MM-DD HH:MM` row per regular file, sorted by name
pub fn build_list_dir(dir: &str) -> String {
    format!(
        "find {} -maxdepth 1 -type f -printf '%f\\t%s\\t%TY-%Tm-%Td %TH:%TM\\n' | LC_ALL=C sort",
        sh_quote(dir)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceAction;

    fn remote(use_sudo_nopass: bool, password: Option<&str>) -> SessionConfig {
        SessionConfig {
            mode: SessionMode::Remote,
            host: "10.0.0.5".into(),
            password: password.map(String::from),
            use_sudo_nopass,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_sh_quote_escapes_single_quotes() {
        assert_eq!(sh_quote("/var/log/it's.log"), "'/var/log/it'\\''s.log'");
        assert_eq!(sh_quote(""), "''");
    }

    #[test]
    fn test_sudo_nopass_simple_command() {
        let cmd = build_sudo(&build_truncate("/var/log/syslog"), &Elevation::NonInteractive);
        assert_eq!(cmd, "sudo -n truncate -c -s 0 '/var/log/syslog'");
    }

    #[test]
    fn test_sudo_wraps_pipelines() {
        let cmd = build_sudo("grep -i php /x | tail -n 200", &Elevation::NonInteractive);
        assert_eq!(cmd, "sudo -n sh -c 'grep -i php /x | tail -n 200'");

        let cmd = build_sudo(&build_search("/x", "a", 10, 5), &Elevation::NonInteractive);
        assert!(cmd.starts_with("sudo -n sh -c 'tail -n 10 '\\''/x'\\'' | grep"));
    }

    #[test]
    fn test_sudo_password_uses_stdin() {
        let el = Elevation::Password("s3cr'et".into());
        let cmd = build_sudo("systemctl restart nginx", &el);
        assert_eq!(
            cmd,
            "printf '%s\\n' 's3cr'\\''et' | sudo -S -p '' systemctl restart nginx"
        );
        let logged = redact(&cmd, &el);
        assert!(!logged.contains("s3cr"));
        assert!(logged.contains("'***'"));
    }

    #[test]
    fn test_no_elevation_is_identity() {
        assert_eq!(build_sudo("cat /a | wc -l", &Elevation::None), "cat /a | wc -l");
    }

    #[test]
    fn test_elevation_for_session() {
        assert_eq!(Elevation::for_session(&remote(true, Some("pw"))), Elevation::NonInteractive);
        assert_eq!(
            Elevation::for_session(&remote(false, Some("pw"))),
            Elevation::Password("pw".into())
        );
        assert_eq!(Elevation::for_session(&remote(false, None)), Elevation::None);

        let local = SessionConfig {
            mode: SessionMode::Local,
            password: Some("pw".into()),
            use_sudo_nopass: false,
            ..SessionConfig::default()
        };
        assert_eq!(Elevation::for_session(&local), Elevation::None);
    }

    #[test]
    fn test_search_pipeline() {
        assert_eq!(
            build_search("/var/log/nginx/error.log", "Disk Full", 5000, 300),
            "tail -n 5000 '/var/log/nginx/error.log' | grep -n -i -F --color=never -e 'Disk Full' | head -n 300"
        );
    }

    #[test]
    fn test_service_commands() {
        assert_eq!(
            build_service_action("php8.2-fpm", ServiceAction::Reload),
            "systemctl reload 'php8.2-fpm'"
        );
        assert_eq!(build_is_active("nginx"), "systemctl is-active 'nginx'");
    }

    #[test]
    fn test_debug_hides_password() {
        let el = Elevation::Password("hunter2".into());
        assert_eq!(format!("{:?}", el), "Password(***)");
    }
}
