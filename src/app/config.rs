use std::path::PathBuf;
use std::time::Duration;

use crate::app::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sqlite_dsn: String,
    pub migrations_dir: PathBuf,
    pub http_host: String,
    pub http_port: u16,
    pub pool_size: usize,
    pub acquire_timeout: Duration,
    pub shutdown_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(error) = dotenvy::dotenv()
            && !error.not_found()
        {
            return Err(AppError::config(format!("failed to load .env file: {error}")));
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sqlite_dsn = required(&lookup, "SQLITE_DSN")?;
        let migrations_dir = PathBuf::from(required(&lookup, "SQLITE_MIGRATIONS_DIR")?);
        let http_port = required(&lookup, "HTTP_SERVER_PORT")?
            .parse::<u16>()
            .map_err(|_| AppError::config("HTTP_SERVER_PORT must be a valid port number"))?;

        let pool_size = parse_or_default(&lookup, "SQLITE_POOL_SIZE", 4_usize)?;
        if pool_size == 0 {
            return Err(AppError::config("SQLITE_POOL_SIZE must be greater than zero"));
        }

        Ok(Self {
            sqlite_dsn,
            migrations_dir,
            http_host: optional(&lookup, "HTTP_SERVER_HOST")
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port,
            pool_size,
            acquire_timeout: Duration::from_millis(parse_or_default(
                &lookup,
                "SQLITE_ACQUIRE_TIMEOUT_MS",
                5000_u64,
            )?),
            shutdown_timeout_secs: parse_or_default(&lookup, "SHUTDOWN_TIMEOUT_SECS", 15_u64)?,
        })
    }

    pub fn http_bind(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required<F>(lookup: &F, key: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    optional(lookup, key).ok_or_else(|| AppError::config(format!("${key} is unset")))
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match optional(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
