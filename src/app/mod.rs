mod config;
mod error;
mod logging;
mod runtime;
pub mod services;

pub use config::AppConfig;
pub use error::AppError;

pub fn run() -> Result<(), AppError> {
    logging::init()?;

    let config = AppConfig::from_env()?;

    tracing::info!(
        sqlite_dsn = %config.sqlite_dsn,
        migrations_dir = %config.migrations_dir.display(),
        http_bind = %config.http_bind(),
        pool_size = config.pool_size,
        acquire_timeout = ?config.acquire_timeout,
        shutdown_timeout_secs = config.shutdown_timeout_secs,
        "application bootstrap initialized"
    );

    runtime::run(config)
}
