//! Configuration management for the circulation server

use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::services::circulation::{DEFAULT_LOAN_PERIOD_DAYS, MAX_LOAN_PERIOD_DAYS};

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Borrow/return history file (JSON Lines)
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub books_path: PathBuf,
    pub users_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CirculationConfig {
    pub loan_period_days: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_token_issuer")]
    pub issuer: String,
    #[serde(default = "default_token_issuer")]
    pub audience: String,
}

fn default_token_issuer() -> String {
    "BookCatalogAPI".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// When set, logs are also written to a daily-rolling file in this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub circulation: CirculationConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default"))
            // Layer on the environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add environment variables (e.g. CIRCULATION_LEDGER__PATH)
            .add_source(
                Environment::with_prefix("CIRCULATION")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("auth.jwt_secret", env::var("JWT_SECRET").ok())?
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.circulation.loan_period()?;
        Ok(config)
    }
}

impl CirculationConfig {
    /// Loan period as a duration; rejects periods outside 1..=MAX_LOAN_PERIOD_DAYS
    pub fn loan_period(&self) -> Result<Duration, ConfigError> {
        if !(1..=MAX_LOAN_PERIOD_DAYS).contains(&self.loan_period_days) {
            return Err(ConfigError::Message(format!(
                "circulation.loan_period_days must be between 1 and {}, got {}",
                MAX_LOAN_PERIOD_DAYS, self.loan_period_days
            )));
        }
        Ok(Duration::days(self.loan_period_days))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/borrow_history.jsonl"),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            books_path: PathBuf::from("data/books.json"),
            users_path: PathBuf::from("data/users.json"),
        }
    }
}

impl Default for CirculationConfig {
    fn default() -> Self {
        Self {
            loan_period_days: DEFAULT_LOAN_PERIOD_DAYS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            directory: None,
        }
    }
}
