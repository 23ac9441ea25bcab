use std::path::Path;
use std::str::FromStr;

use tracing::{info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://lesson-tracker.db?mode=rwc";
const DEFAULT_SESSION_TTL_HOURS: i64 = 24;
const DEFAULT_SESSION_CLEANUP_INTERVAL_SECS: u64 = 3600;

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("debug".to_string()) == "release";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
}

/// Runtime settings read from the process environment after the env files
/// have been layered in.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub session_ttl_hours: i64,
    pub session_cleanup_interval_secs: u64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            session_cleanup_interval_secs: DEFAULT_SESSION_CLEANUP_INTERVAL_SECS,
            bootstrap_admin: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let defaults = Settings::default();

        let database_url = dotenvy::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(defaults.database_url);

        let session_ttl_hours =
            parse_var("SESSION_TTL_HOURS")?.unwrap_or(defaults.session_ttl_hours);
        if session_ttl_hours <= 0 {
            anyhow::bail!("SESSION_TTL_HOURS must be positive, got {}", session_ttl_hours);
        }

        let session_cleanup_interval_secs = parse_var("SESSION_CLEANUP_INTERVAL_SECS")?
            .unwrap_or(defaults.session_cleanup_interval_secs);

        let bootstrap_admin = match (
            dotenvy::var("BOOTSTRAP_ADMIN_USERNAME").ok(),
            dotenvy::var("BOOTSTRAP_ADMIN_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(BootstrapAdmin { username, password })
            }
            (Some(_), None) | (None, Some(_)) => {
                warn!("Only one of BOOTSTRAP_ADMIN_USERNAME/BOOTSTRAP_ADMIN_PASSWORD is set, ignoring");
                None
            }
            _ => None,
        };

        Ok(Self {
            database_url,
            session_ttl_hours,
            session_cleanup_interval_secs,
            bootstrap_admin,
        })
    }
}

fn parse_var<T>(name: &str) -> Result<Option<T>, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match dotenvy::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", name, raw, e)),
        Err(_) => Ok(None),
    }
}
