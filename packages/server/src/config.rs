use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub upstream_api_key: String,
    pub upstream_subscription_key: String,
    pub upstream_client_id: String,
    /// Default season (year) the Upstream Client targets absent a
    /// historical-sync override.
    pub upstream_season_id: i32,
    /// Selects container vs. local paths for any auxiliary subprocess.
    pub is_docker: bool,
    /// Path to the embedded record store file (rusqlite).
    pub record_store_path: String,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development).
        let _ = dotenv();

        Ok(Self {
            upstream_api_key: env::var("UPSTREAM_API_KEY")
                .context("UPSTREAM_API_KEY must be set")?,
            upstream_subscription_key: env::var("UPSTREAM_SUBSCRIPTION_KEY")
                .context("UPSTREAM_SUBSCRIPTION_KEY must be set")?,
            upstream_client_id: env::var("UPSTREAM_CLIENT_ID")
                .context("UPSTREAM_CLIENT_ID must be set")?,
            upstream_season_id: env::var("UPSTREAM_SEASON_ID")
                .context("UPSTREAM_SEASON_ID must be set")?
                .parse()
                .context("UPSTREAM_SEASON_ID must be a valid integer")?,
            is_docker: env::var("IS_DOCKER")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            record_store_path: env::var("RECORD_STORE_PATH")
                .unwrap_or_else(|_| "./campsync.sqlite3".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
        })
    }
}
