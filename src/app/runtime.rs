use std::path::Path;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db::{ConnectionPool, run_migrations};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::services::SqlitePersonService;

/// Opens the pool and brings the schema up to date. Runs once, before the
/// listener binds.
pub fn prepare_storage(config: &AppConfig) -> Result<Arc<ConnectionPool>, AppError> {
    let pool = ConnectionPool::open(&config.sqlite_dsn, config.pool_size, config.acquire_timeout)
        .map_err(AppError::database_init)?;

    tracing::info!("execute database migration");
    migrate(&pool, &config.migrations_dir)?;

    Ok(Arc::new(pool))
}

fn migrate(pool: &ConnectionPool, migrations_dir: &Path) -> Result<(), AppError> {
    let mut connection = pool.acquire().map_err(AppError::database_init)?;
    let version =
        run_migrations(&mut connection, migrations_dir).map_err(AppError::database_init)?;

    tracing::info!(schema_version = version, "database schema up to date");
    Ok(())
}

fn close_pool(pool: &ConnectionPool) {
    tracing::info!("close database connections");

    for error in pool.close() {
        tracing::error!(error = %error, "failed to close database connection");
    }
}

pub fn run(config: AppConfig) -> Result<(), AppError> {
    let pool = prepare_storage(&config)?;
    let api_state = ApiState {
        persons: SqlitePersonService::new(Arc::clone(&pool)),
    };

    let bind = config.http_bind();
    tracing::info!(url = %format!("http://{bind}"), "http server starting");

    let server_result = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(api_state.clone()))
                .configure(configure_routes)
        })
        .bind(&bind)?
        .shutdown_timeout(config.shutdown_timeout_secs)
        .run()
        .await
    });

    tracing::info!("http server stopped");
    close_pool(&pool);

    server_result.map_err(AppError::runtime)
}
