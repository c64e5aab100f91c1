use tracing_subscriber::{EnvFilter, fmt};

use crate::app::AppError;

const DEFAULT_DIRECTIVES: &str = "info,actix_server=warn";

pub fn init() -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVES))
        .map_err(AppError::logging_init)?;

    // Storage calls run on actix's blocking pool; thread names tell them apart.
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(AppError::logging_init)
}
