//! Configuration for the tracker server, resolved from the environment.
//!
//! Storage backend selection, first match wins:
//! 1. `DATABASE_URL` set and non-empty
//! 2. `USE_DATABASE` truthy, composing a PostgreSQL URL from `DB_*` parts
//! 3. otherwise the JSON file backend
//!
//! Data directory precedence:
//! 1. `TRACKER_DATA_DIR` environment variable
//! 2. `$HOME/.config/tracker/data`
//! 3. `./data` relative to the working directory

use std::env;
use std::path::PathBuf;

const DEFAULT_CONFIG_DIR: &str = ".config/tracker/data";
const DEV_DATA_DIR: &str = "./data";
const DEFAULT_PORT: u16 = 8001;

const DEFAULT_DB_USER: &str = "postgres";
const DEFAULT_DB_PASSWORD: &str = "password";
const DEFAULT_DB_HOST: &str = "localhost";
const DEFAULT_DB_PORT: &str = "5432";
const DEFAULT_DB_NAME: &str = "game_tracker";

#[derive(Debug, Clone)]
pub struct Config {
    /// `Some` selects the relational backend; `None` the JSON files.
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: resolve_database_url(),
            data_dir: get_data_dir(),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
        }
    }
}

fn resolve_database_url() -> Option<String> {
    if let Ok(url) = env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return Some(url);
        }
    }
    if is_truthy(env::var("USE_DATABASE").ok().as_deref()) {
        return Some(compose_database_url());
    }
    None
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

fn compose_database_url() -> String {
    let var_or = |key: &str, default: &str| env::var(key).unwrap_or_else(|_| default.to_string());
    let user = var_or("DB_USER", DEFAULT_DB_USER);
    let password = var_or("DB_PASSWORD", DEFAULT_DB_PASSWORD);
    let host = var_or("DB_HOST", DEFAULT_DB_HOST);
    let port = var_or("DB_PORT", DEFAULT_DB_PORT);
    let name = var_or("DB_NAME", DEFAULT_DB_NAME);
    format!("postgres://{user}:{password}@{host}:{port}/{name}")
}

fn get_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("TRACKER_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home).join(DEFAULT_CONFIG_DIR);
    }
    PathBuf::from(DEV_DATA_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var mutation is process-global and races with parallel tests, so
    // the env-dependent paths are covered through the pure helpers.

    #[test]
    fn test_is_truthy_accepts_the_usual_spellings() {
        for v in ["true", "TRUE", " True ", "1", "yes", "YES"] {
            assert!(is_truthy(Some(v)), "{v:?} should be truthy");
        }
        for v in ["false", "0", "no", "", "maybe"] {
            assert!(!is_truthy(Some(v)), "{v:?} should not be truthy");
        }
        assert!(!is_truthy(None));
    }

    #[test]
    fn test_data_dir_is_never_empty() {
        let dir = get_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }

    #[test]
    fn test_default_port() {
        assert_eq!(DEFAULT_PORT, 8001);
    }
}
