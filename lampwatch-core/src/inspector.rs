//! Service status reports built from backend probes

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::backend::ExecutionBackend;
use crate::error::{BackendError, Result};
use crate::model::{ActivityState, ServiceKind, ServiceStatusReport, ShortVersion};
use crate::paths;

const NOT_FOUND_MARKERS: &[&str] = &[
    "could not be found",
    "not found",
    "not-found",
    "no such",
    "not installed",
];

/// Tried in order, first capture wins
static VERSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"Distrib (\d+\.\d+\.\d+-MariaDB)",
        r"from (\d+\.\d+\.\d+-MariaDB)",
        r"Distrib (\d+\.\d+(?:\.\d+)?)",
        r"PHP (\d+\.\d+(?:\.\d+)?)",
        r"nginx/(\d+\.\d+(?:\.\d+)?)",
        r"Ver (\d+\.\d+(?:\.\d+)?)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static PHP_MINOR: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"PHP (\d+\.\d+)").ok());

/// Classify an `is-active` style answer.
///
/// `inactive` is checked before `active` because it contains it.
pub fn classify_activity(text: &str) -> ActivityState {
    let lower = text.to_lowercase();
    if lower.contains("inactive") {
        ActivityState::Inactive
    } else if lower.contains("active") {
        ActivityState::Active
    } else if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        ActivityState::NotFound
    } else {
        ActivityState::Unknown
    }
}

pub fn parse_short_version(raw: &str) -> ShortVersion {
    VERSION_PATTERNS
        .iter()
        .find_map(|re| re.captures(raw).and_then(|c| c.get(1)))
        .map(|m| ShortVersion::Parsed(m.as_str().to_string()))
        .unwrap_or(ShortVersion::Unparsed)
}

/// `php8.2-fpm` from `PHP 8.2.7 (cli) ...`
pub fn php_service_name(raw: &str) -> Option<String> {
    let re = PHP_MINOR.as_ref()?;
    re.captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| format!("php{}-fpm", m.as_str()))
}

/// Builds [`ServiceStatusReport`]s on top of any backend
pub struct ServiceInspector<'a> {
    backend: &'a dyn ExecutionBackend,
}

impl<'a> ServiceInspector<'a> {
    pub fn new(backend: &'a dyn ExecutionBackend) -> Self {
        Self { backend }
    }

    pub async fn nginx_report(&self) -> Result<ServiceStatusReport> {
        let version = self.backend.get_service_version(ServiceKind::Nginx).await;
        let activity = self.activity(paths::NGINX_SERVICE).await?;
        build_report(
            ServiceKind::Nginx,
            version,
            Some(paths::NGINX_SERVICE.to_string()),
            activity,
        )
    }

    /// The unit name is derived from the PHP version, so no version means no unit
    pub async fn php_report(&self) -> Result<ServiceStatusReport> {
        let version = self.backend.get_service_version(ServiceKind::PhpFpm).await;
        let service_name = version.as_ref().ok().and_then(|v| php_service_name(v));
        let activity = match &service_name {
            Some(unit) => self.activity(unit).await?,
            None => ActivityState::NotFound,
        };
        build_report(ServiceKind::PhpFpm, version, service_name, activity)
    }

    pub async fn database_report(&self) -> Result<ServiceStatusReport> {
        let version = self.backend.get_service_version(ServiceKind::Database).await;
        let unit = self.backend.db_service_name().await?;
        let activity = self.activity(&unit).await?;
        build_report(ServiceKind::Database, version, Some(unit), activity)
    }

    /// nginx, PHP-FPM and database, in that order
    pub async fn refresh_all(&self) -> Result<Vec<ServiceStatusReport>> {
        Ok(vec![
            self.nginx_report().await?,
            self.php_report().await?,
            self.database_report().await?,
        ])
    }

    async fn activity(&self, unit: &str) -> Result<ActivityState> {
        let text = self.backend.get_service_activity(unit).await?;
        let state = classify_activity(&text);
        debug!(unit, answer = %text, ?state, "activity");
        Ok(state)
    }
}

/// Lookup failures become report text; only transport errors abort the refresh
fn build_report(
    service: ServiceKind,
    version: Result<String>,
    service_name: Option<String>,
    activity: ActivityState,
) -> Result<ServiceStatusReport> {
    let (version_raw, version_short) = match version {
        Ok(raw) => {
            let short = parse_short_version(&raw);
            (raw, short)
        }
        Err(e @ BackendError::Connection(_)) => return Err(e),
        Err(e) => (e.to_string(), ShortVersion::Unparsed),
    };
    Ok(ServiceStatusReport {
        service,
        version_raw,
        version_short,
        service_name,
        activity,
    })
}
