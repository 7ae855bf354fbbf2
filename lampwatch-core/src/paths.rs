//! Fixed locations on a Debian-style LAMP host

pub const LOG_DIR: &str = "/var/log";
pub const NGINX_ERROR_LOG: &str = "/var/log/nginx/error.log";
pub const NGINX_ACCESS_LOG: &str = "/var/log/nginx/access.log";
pub const NGINX_LOG_GLOB: &str = "/var/log/nginx/*.log";
pub const PHP_FPM_LOG_GLOB: &str = "/var/log/php*-fpm.log";
pub const WEB_ROOT: &str = "/var/www/html";

/// Probed in order for `nginx -v`
pub const NGINX_BINARIES: &[&str] = &[
    "nginx",
    "/usr/sbin/nginx",
    "/usr/local/nginx/sbin/nginx",
    "/usr/local/sbin/nginx",
];

pub const DB_ERROR_LOGS: &[&str] = &["/var/log/mysql/error.log", "/var/log/mariadb/mariadb.log"];
pub const DB_SOCKET_DIRS: &[&str] = &["/var/run/mysqld/", "/run/mysqld/"];
pub const DB_CONFIG_PATHS: &[&str] = &["/etc/mysql/", "/etc/my.cnf", "/etc/my.cnf.d"];
pub const DB_PORT: u16 = 3306;

/// First unit present in `systemctl list-units` wins
pub const DB_SERVICE_CANDIDATES: &[&str] = &["mariadb", "mysql"];
pub const DEFAULT_DB_SERVICE: &str = "mariadb";

pub const NGINX_SERVICE: &str = "nginx";
