use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

/// What happens when a group or function that is still referenced gets
/// deleted. Callers may override per request; this is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Refuse the delete while references exist.
    Reject,
    /// Remove dependents along with the entity.
    Cascade,
}

impl FromStr for DeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "cascade" => Ok(Self::Cascade),
            other => Err(format!("unknown delete policy: {other}")),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub admin_user: String,
    pub admin_password: String,
    pub database_url: String,
    pub data_dir: String,
    pub delete_policy: DeletePolicy,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("BOARD_PORT", "8080"),
            admin_user: try_load("BOARD_ADMIN_USER", "admin"),
            admin_password: try_load("BOARD_ADMIN_PASSWORD", "admin"),
            database_url: try_load("BOARD_DATABASE_URL", "sqlite://board.db"),
            data_dir: try_load("BOARD_DATA_DIR", "uploads"),
            delete_policy: try_load("BOARD_DELETE_POLICY", "reject"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}
