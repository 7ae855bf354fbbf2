use clap::{Subcommand, ValueEnum};

use lampwatch_core::inspector::php_service_name;
use lampwatch_core::model::{OperationOutcome, ServiceAction};
use lampwatch_core::{BackendError, ExecutionBackend, paths};

use super::{CliError, CliResult, confirm, print_text};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServiceTarget {
    Nginx,
    Php,
    Db,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    Start,
    Stop,
    Restart,
    Reload,
}

impl From<ActionArg> for ServiceAction {
    fn from(a: ActionArg) -> Self {
        match a {
            ActionArg::Start => ServiceAction::Start,
            ActionArg::Stop => ServiceAction::Stop,
            ActionArg::Restart => ServiceAction::Restart,
            ActionArg::Reload => ServiceAction::Reload,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum NginxCommand {
    /// Run `nginx -t`
    ConfigTest,
    /// List the web root
    WebRoot,
    /// PHP errors in the nginx error log
    PhpErrors,
    /// Last lines of the nginx error log
    ErrorLog {
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
    /// Last lines of the nginx access log
    AccessLog {
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
    /// Empty every nginx log
    TruncateLogs {
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum PhpCommand {
    /// Empty every PHP-FPM log
    TruncateLogs {
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Client version
    Version,
    /// systemctl status of the database unit
    Status,
    /// Detected unit name (mariadb or mysql)
    Service,
    /// Listener on the database port
    Port,
    /// Socket files
    Socket,
    /// Tail of the first readable error log
    ErrorLog,
    /// bind-address from the server config
    BindAddress,
    /// Database errors in the nginx error log
    NginxErrors,
    /// Database errors anywhere under /var/log
    VarlogErrors,
    /// Empty the database error logs
    TruncateLogs {
        #[arg(short, long)]
        yes: bool,
    },
}

/// Unit name systemctl should act on
async fn unit_for(backend: &dyn ExecutionBackend, target: ServiceTarget) -> Result<String, CliError> {
    match target {
        ServiceTarget::Nginx => Ok(paths::NGINX_SERVICE.to_string()),
        ServiceTarget::Php => {
            let version = backend.php_version().await?;
            php_service_name(&version).ok_or_else(|| {
                CliError::Usage(format!("cannot derive the PHP-FPM unit from '{}'", version.trim()))
            })
        }
        ServiceTarget::Db => Ok(backend.db_service_name().await?),
    }
}

pub async fn run_service(
    backend: &dyn ExecutionBackend,
    target: ServiceTarget,
    action: ActionArg,
    yes: bool,
) -> CliResult {
    let action = ServiceAction::from(action);
    let unit = unit_for(backend, target).await?;
    if action.is_disruptive() && !confirm(&format!("{} {}?", action, unit), yes)? {
        eprintln!("aborted");
        return Ok(());
    }
    let message = backend.control_service(&unit, action).await?;
    print_text(&message);
    Ok(())
}

pub async fn run_nginx(backend: &dyn ExecutionBackend, cmd: NginxCommand) -> CliResult {
    let text = match cmd {
        NginxCommand::ConfigTest => backend.check_nginx_config().await?,
        NginxCommand::WebRoot => backend.list_web_root().await?,
        NginxCommand::PhpErrors => backend.check_php_errors().await?,
        NginxCommand::ErrorLog { lines } => backend.tail(paths::NGINX_ERROR_LOG, lines).await?,
        NginxCommand::AccessLog { lines } => backend.tail(paths::NGINX_ACCESS_LOG, lines).await?,
        NginxCommand::TruncateLogs { yes } => {
            if !confirm("Truncate all nginx logs?", yes)? {
                eprintln!("aborted");
                return Ok(());
            }
            return report_outcome(backend.truncate_nginx_logs().await);
        }
    };
    print_text(&text);
    Ok(())
}

pub async fn run_php(backend: &dyn ExecutionBackend, cmd: PhpCommand) -> CliResult {
    match cmd {
        PhpCommand::TruncateLogs { yes } => {
            if !confirm("Truncate all PHP-FPM logs?", yes)? {
                eprintln!("aborted");
                return Ok(());
            }
            report_outcome(backend.truncate_php_logs().await)
        }
    }
}

pub async fn run_db(backend: &dyn ExecutionBackend, cmd: DbCommand) -> CliResult {
    let text = match cmd {
        DbCommand::Version => match backend.db_version().await {
            Ok(v) => v,
            Err(BackendError::NotFound { .. }) => {
                return Err(CliError::Usage(
                    "no mysql/mariadb client found on the host".into(),
                ));
            }
            Err(e) => return Err(e.into()),
        },
        DbCommand::Status => backend.db_status().await?,
        DbCommand::Service => backend.db_service_name().await?,
        DbCommand::Port => backend.db_port_check().await?,
        DbCommand::Socket => backend.db_socket_check().await?,
        DbCommand::ErrorLog => backend.db_error_log().await?,
        DbCommand::BindAddress => backend.db_bind_address().await?,
        DbCommand::NginxErrors => backend.db_errors_in_nginx().await?,
        DbCommand::VarlogErrors => backend.db_errors_in_varlog().await?,
        DbCommand::TruncateLogs { yes } => {
            if !confirm("Truncate the database error logs?", yes)? {
                eprintln!("aborted");
                return Ok(());
            }
            return report_outcome(backend.truncate_db_logs().await);
        }
    };
    print_text(&text);
    Ok(())
}

fn report_outcome(outcome: OperationOutcome) -> CliResult {
    if outcome.success {
        print_text(&outcome.message);
        Ok(())
    } else {
        Err(CliError::Usage(outcome.message))
    }
}
