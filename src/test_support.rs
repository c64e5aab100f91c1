use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::Connection;

use crate::adapters::db::{ConnectionPool, open_connection, run_migrations};

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn migrations_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
}

/// Unique database file under `target/testdb`, removed by `cargo clean`.
pub fn temp_db_path(test_name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("target/testdb");
    std::fs::create_dir_all(&dir).expect("testdb dir should be created");

    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(
        "{test_name}-{}-{counter}.sqlite",
        std::process::id()
    ))
}

/// Opens a connection to a fresh copy of the migrated template database.
pub fn open_test_connection(test_name: &str) -> Connection {
    let path = copy_template_db(test_name);
    open_connection(path.to_string_lossy().as_ref()).expect("test db should open")
}

pub fn open_test_pool(test_name: &str, size: usize) -> ConnectionPool {
    open_test_pool_with_timeout(test_name, size, Duration::from_secs(5))
}

pub fn open_test_pool_with_timeout(
    test_name: &str,
    size: usize,
    acquire_timeout: Duration,
) -> ConnectionPool {
    let path = copy_template_db(test_name);
    ConnectionPool::open(path.to_string_lossy().as_ref(), size, acquire_timeout)
        .expect("test pool should open")
}

fn copy_template_db(test_name: &str) -> PathBuf {
    let template = ensure_template_db();
    let test_db_path = temp_db_path(test_name);

    std::fs::copy(template, &test_db_path).expect("template db should be copied");
    test_db_path
}

fn ensure_template_db() -> &'static Path {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH.get_or_init(|| {
        let template_path = temp_db_path("person_template");
        let mut connection = open_connection(template_path.to_string_lossy().as_ref())
            .expect("template db opens");
        run_migrations(&mut connection, &migrations_dir())
            .expect("template migrations should succeed");

        template_path
    })
}

#[cfg(test)]
mod tests {
    use super::temp_db_path;

    #[test]
    fn db_paths_are_unique_and_under_target() {
        let first = temp_db_path("paths");
        let second = temp_db_path("paths");

        assert_ne!(first, second);
        assert!(first.starts_with(concat!(env!("CARGO_MANIFEST_DIR"), "/target/testdb")));
        assert!(first.parent().is_some_and(|dir| dir.is_dir()));
        assert!(!first.exists());
    }
}
