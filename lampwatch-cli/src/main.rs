mod backends;
mod commands;
mod ssh;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lampwatch_core::backend::{DEFAULT_MAX_HITS, DEFAULT_SEARCH_TAIL};
use lampwatch_core::config::{REFRESH_INTERVAL, SessionConfig, SessionMode, Settings};
use lampwatch_core::ExecutionBackend;

use commands::{ActionArg, CliError, CliResult, DbCommand, NginxCommand, PhpCommand, ServiceTarget};

#[derive(Parser, Debug)]
#[command(name = "lampwatch")]
#[command(about = "Inspect and operate nginx, PHP-FPM and MySQL/MariaDB, locally or over SSH", long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    /// Remote host; omit to reuse the saved connection
    #[arg(long, global = true, conflicts_with = "local")]
    host: Option<String>,

    #[arg(short, long, global = true)]
    user: Option<String>,

    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Private key file
    #[arg(short = 'i', long, global = true)]
    key: Option<PathBuf>,

    /// Read the SSH/sudo password from this environment variable
    #[arg(long, value_name = "VAR", global = true)]
    password_env: Option<String>,

    /// Do not assume passwordless sudo
    #[arg(long, global = true)]
    no_sudo_nopass: bool,

    /// Operate on this machine
    #[arg(long, global = true)]
    local: bool,

    /// Remember this connection for later runs
    #[arg(long, global = true)]
    save: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Version and state of nginx, PHP-FPM and the database
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Refresh the status periodically until Ctrl-C
    Watch {
        /// Seconds between refreshes
        #[arg(long, default_value_t = REFRESH_INTERVAL.as_secs())]
        interval: u64,
        #[arg(long)]
        json: bool,
    },
    /// Last lines of a log file
    Tail {
        path: String,
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
    /// Size of a file
    Size {
        path: String,
        /// Print the raw byte count
        #[arg(long)]
        bytes: bool,
    },
    /// Case-insensitive literal search in the tail of a log file
    Search {
        path: String,
        pattern: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_TAIL)]
        tail_lines: usize,
        #[arg(long, default_value_t = DEFAULT_MAX_HITS)]
        max_hits: usize,
    },
    /// Empty a log file
    Truncate {
        path: String,
        #[arg(short, long)]
        yes: bool,
    },
    /// List the log directory
    Ls {
        #[arg(long)]
        json: bool,
    },
    /// Copy a file to this machine
    Download {
        remote: String,
        local: Option<PathBuf>,
    },
    /// Start, stop, restart or reload a service
    Service {
        #[arg(value_enum)]
        target: ServiceTarget,
        #[arg(value_enum)]
        action: ActionArg,
        #[arg(short, long)]
        yes: bool,
    },
    /// Stream a log file until Ctrl-C
    Follow { path: String },
    /// nginx diagnostics
    #[command(subcommand)]
    Nginx(NginxCommand),
    /// PHP-FPM maintenance
    #[command(subcommand)]
    Php(PhpCommand),
    /// Database diagnostics
    #[command(subcommand)]
    Db(DbCommand),
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge command-line flags over the saved connection
fn resolve_config(args: &ConnectionArgs, settings: &Settings) -> Result<SessionConfig, CliError> {
    let mut config = if args.local {
        SessionConfig::local()
    } else {
        settings
            .last_connection
            .clone()
            .unwrap_or_else(SessionConfig::local)
    };

    if let Some(host) = &args.host {
        if config.host != *host {
            config.key_path = None;
        }
        config.mode = SessionMode::Remote;
        config.host = host.clone();
    }
    if let Some(user) = &args.user {
        config.user = user.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(key) = &args.key {
        config.key_path = Some(key.clone());
    }
    if let Some(var) = &args.password_env {
        let password = std::env::var(var)
            .map_err(|_| CliError::Usage(format!("environment variable {} is not set", var)))?;
        config.password = Some(password);
    }
    if args.no_sudo_nopass {
        config.use_sudo_nopass = false;
    }
    Ok(config)
}

async fn dispatch(backend: &dyn ExecutionBackend, command: Commands) -> CliResult {
    match command {
        Commands::Status { json } => commands::run_status(backend, json).await,
        Commands::Watch { interval, json } => {
            commands::run_watch(backend, Duration::from_secs(interval.max(1)), json).await
        }
        Commands::Tail { path, lines } => commands::run_tail(backend, &path, lines).await,
        Commands::Size { path, bytes } => commands::run_size(backend, &path, bytes).await,
        Commands::Search {
            path,
            pattern,
            tail_lines,
            max_hits,
        } => commands::run_search(backend, &path, &pattern, tail_lines, max_hits).await,
        Commands::Truncate { path, yes } => commands::run_truncate(backend, &path, yes).await,
        Commands::Ls { json } => commands::run_ls(backend, json).await,
        Commands::Download { remote, local } => {
            commands::run_download(backend, &remote, local).await
        }
        Commands::Service {
            target,
            action,
            yes,
        } => commands::run_service(backend, target, action, yes).await,
        Commands::Follow { path } => commands::run_follow(backend, &path).await,
        Commands::Nginx(cmd) => commands::run_nginx(backend, cmd).await,
        Commands::Php(cmd) => commands::run_php(backend, cmd).await,
        Commands::Db(cmd) => commands::run_db(backend, cmd).await,
    }
}

async fn run(cli: Cli) -> CliResult {
    let cwd = std::env::current_dir()?;
    let (settings_path, mut settings) = Settings::discover(&cwd)?;
    let config = resolve_config(&cli.connection, &settings)?;

    let connection = backends::connect(&config).await?;
    if cli.connection.save {
        settings.remember(&config);
        settings.save(&settings_path)?;
        eprintln!("Saved connection to {}", settings_path.display());
    }

    let result = dispatch(connection.backend(), cli.command).await;
    connection.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(host: &str) -> Settings {
        let mut settings = Settings::default();
        let mut config = SessionConfig::remote(host, "deploy");
        config.key_path = Some(PathBuf::from("/home/deploy/.ssh/id_ed25519"));
        settings.remember(&config);
        settings
    }

    #[test]
    fn test_resolve_defaults_to_local() {
        let config = resolve_config(&ConnectionArgs::default(), &Settings::default()).unwrap();
        assert!(config.is_local());
        assert!(config.use_sudo_nopass);
    }

    #[test]
    fn test_resolve_reuses_saved_connection() {
        let config = resolve_config(&ConnectionArgs::default(), &saved("web01")).unwrap();
        assert_eq!(config.mode, SessionMode::Remote);
        assert_eq!(config.host, "web01");
        assert_eq!(config.user, "deploy");
        assert!(config.key_path.is_some());
    }

    #[test]
    fn test_resolve_flags_override_saved() {
        let args = ConnectionArgs {
            host: Some("db01".into()),
            port: Some(2222),
            no_sudo_nopass: true,
            ..Default::default()
        };
        let config = resolve_config(&args, &saved("web01")).unwrap();
        assert_eq!(config.host, "db01");
        assert_eq!(config.user, "deploy");
        assert_eq!(config.port, 2222);
        // A key saved for another host is not reused
        assert!(config.key_path.is_none());
        assert!(!config.use_sudo_nopass);
    }

    #[test]
    fn test_resolve_local_flag_ignores_saved() {
        let args = ConnectionArgs {
            local: true,
            ..Default::default()
        };
        assert!(resolve_config(&args, &saved("web01")).unwrap().is_local());
    }

    #[test]
    fn test_resolve_missing_password_env() {
        let args = ConnectionArgs {
            host: Some("web01".into()),
            password_env: Some("LAMPWATCH_TEST_PASSWORD_UNSET".into()),
            ..Default::default()
        };
        let err = resolve_config(&args, &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("LAMPWATCH_TEST_PASSWORD_UNSET"));
    }

    #[test]
    fn test_cli_parses_global_connection_flags() {
        let cli = Cli::try_parse_from([
            "lampwatch", "search", "/var/log/nginx/error.log", "upstream", "--host", "web01",
            "-u", "admin", "--max-hits", "10",
        ])
        .unwrap();
        assert_eq!(cli.connection.host.as_deref(), Some("web01"));
        assert_eq!(cli.connection.user.as_deref(), Some("admin"));
        match cli.command {
            Commands::Search {
                tail_lines,
                max_hits,
                ..
            } => {
                assert_eq!(tail_lines, DEFAULT_SEARCH_TAIL);
                assert_eq!(max_hits, 10);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_service_and_db() {
        let cli = Cli::try_parse_from(["lampwatch", "service", "php", "reload"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Service {
                target: ServiceTarget::Php,
                action: ActionArg::Reload,
                yes: false
            }
        ));

        let cli = Cli::try_parse_from(["lampwatch", "db", "truncate-logs", "-y"]).unwrap();
        assert!(matches!(cli.command, Commands::Db(DbCommand::TruncateLogs { yes: true })));
    }

    #[test]
    fn test_cli_parses_size_and_nginx_logs() {
        let cli = Cli::try_parse_from(["lampwatch", "size", "/var/log/syslog", "--bytes"]).unwrap();
        assert!(matches!(cli.command, Commands::Size { bytes: true, .. }));

        let cli = Cli::try_parse_from(["lampwatch", "nginx", "access-log", "-n", "20"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Nginx(NginxCommand::AccessLog { lines: 20 })
        ));
    }

    #[test]
    fn test_cli_local_conflicts_with_host() {
        assert!(Cli::try_parse_from(["lampwatch", "--local", "--host", "web01", "status"]).is_err());
    }
}
