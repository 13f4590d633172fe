//! Test fixtures and environment helpers.

use std::path::Path;
use std::process::Command;

/// Environment variable holding an externally managed `PostgreSQL` DSN.
pub const POSTGRES_URL_ENV: &str = "BEDROCK_TEST_POSTGRES_URL";
/// Environment variable holding an externally managed `MySQL` DSN.
pub const MYSQL_URL_ENV: &str = "BEDROCK_TEST_MYSQL_URL";

/// Returns `true` if a Docker daemon is reachable for integration tests.
#[must_use]
pub fn docker_available() -> bool {
    docker_available_with_host(std::env::var("DOCKER_HOST").ok())
}

fn docker_available_with_host(host: Option<String>) -> bool {
    if let Some(host) = host {
        if let Some(path) = host.strip_prefix("unix://") {
            return Path::new(path).exists();
        }
        return true;
    }

    Path::new("/var/run/docker.sock").exists()
        || Command::new("docker")
            .args(["info"])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
}

/// Build a `SQLite` data source for a database file named `name` inside `dir`.
///
/// The file is created on first connect.
#[must_use]
pub fn sqlite_data_source(dir: &Path, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", dir.join(format!("{name}.db")).display())
}

/// Look up an externally provisioned DSN for `driver` (`postgres` or `mysql`).
#[must_use]
pub fn external_data_source(driver: &str) -> Option<String> {
    external_data_source_with(driver, |name| std::env::var(name).ok())
}

fn external_data_source_with<F>(driver: &str, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let name = match driver {
        "postgres" => POSTGRES_URL_ENV,
        "mysql" => MYSQL_URL_ENV,
        _ => return None,
    };
    lookup(name).filter(|value| !value.trim().is_empty())
}
