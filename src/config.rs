//! Configuration management

use std::time::Duration;

use anyhow::{self, Context, Result};

const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Optional NATS credentials
    pub nats_user: Option<String>,
    pub nats_password: Option<String>,

    /// PostgreSQL connection string
    pub database_url: String,

    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,

    /// Upper bound for one replace transaction
    pub store_timeout: Duration,

    /// Sliding idle timeout for sessions; `None` disables expiry
    pub session_idle: Option<chrono::Duration>,

    /// Largest decoded upload accepted by the replace endpoints
    pub max_upload_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL")
            .unwrap_or_else(|_| "nats://localhost:4222".to_string());

        let nats_user = non_empty_var("NATS_USER");
        let nats_password = non_empty_var("NATS_PASSWORD");

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let db_max_connections = parse_var("DB_MAX_CONNECTIONS", 10u32)?;
        if db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }

        let db_acquire_timeout = Duration::from_secs(parse_var("DB_ACQUIRE_TIMEOUT_SECS", 10u64)?);
        let store_timeout = Duration::from_secs(parse_var("STORE_TIMEOUT_SECS", 30u64)?);
        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let session_idle = parse_session_idle(std::env::var("SESSION_IDLE_MS").ok().as_deref());
        if session_idle.is_none() {
            tracing::warn!("SESSION_IDLE_MS not set, sessions never expire");
        }

        Ok(Self {
            nats_url,
            nats_user,
            nats_password,
            database_url,
            db_max_connections,
            db_acquire_timeout,
            store_timeout,
            session_idle,
            max_upload_bytes,
        })
    }
}

/// Positive millisecond count → idle timeout. Anything else disables it.
fn parse_session_idle(raw: Option<&str>) -> Option<chrono::Duration> {
    let ms = raw?.trim().parse::<i64>().ok()?;
    (ms > 0).then(|| chrono::Duration::milliseconds(ms))
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number (got {raw:?})")),
        _ => Ok(default),
    }
}
