use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const UP_MIGRATION_SUFFIX: &str = ".up.sql";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to read migrations: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out after {0:?} waiting for a database connection")]
    PoolTimeout(Duration),
    #[error("connection pool lock poisoned")]
    PoolPoisoned,
    #[error("connection pool is closed")]
    PoolClosed,
    #[error("invalid migration file {path}: {reason}")]
    InvalidMigration { path: PathBuf, reason: String },
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
    #[error("invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: String },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    connection.pragma_update(None, "foreign_keys", true)?;
    Ok(connection)
}

/// Fixed-size set of SQLite connections handed out one caller at a time.
pub struct ConnectionPool {
    state: Mutex<PoolState>,
    available: Condvar,
    size: usize,
    acquire_timeout: Duration,
}

struct PoolState {
    idle: Vec<Connection>,
    closed: bool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("size", &self.size)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    pub fn open(path: &str, size: usize, acquire_timeout: Duration) -> Result<Self, DbError> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(open_connection(path)?);
        }

        Ok(Self::from_connections(connections, acquire_timeout))
    }

    pub fn from_connections(connections: Vec<Connection>, acquire_timeout: Duration) -> Self {
        Self {
            size: connections.len(),
            state: Mutex::new(PoolState {
                idle: connections,
                closed: false,
            }),
            available: Condvar::new(),
            acquire_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Checks out a connection, waiting up to the pool's acquire timeout. The
    /// connection goes back to the pool when the guard drops.
    pub fn acquire(&self) -> Result<PooledConnection<'_>, DbError> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut state = self.state.lock().map_err(|_| DbError::PoolPoisoned)?;

        loop {
            if state.closed {
                return Err(DbError::PoolClosed);
            }

            if let Some(connection) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    connection: Some(connection),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DbError::PoolTimeout(self.acquire_timeout));
            }

            let (guard, _) = self
                .available
                .wait_timeout(state, remaining)
                .map_err(|_| DbError::PoolPoisoned)?;
            state = guard;
        }
    }

    /// Marks the pool closed and closes every idle connection. Later `acquire`
    /// calls fail with `PoolClosed`, and connections still checked out are
    /// closed as their guards drop.
    pub fn close(&self) -> Vec<DbError> {
        let connections = match self.state.lock() {
            Ok(mut state) => {
                state.closed = true;
                std::mem::take(&mut state.idle)
            }
            Err(_) => return vec![DbError::PoolPoisoned],
        };
        self.available.notify_all();

        close_connections(connections)
    }

    fn release(&self, connection: Connection) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if state.closed {
            drop(state);
            for error in close_connections(vec![connection]) {
                tracing::warn!(error = %error, "failed to close released sqlite connection");
            }
            return;
        }

        state.idle.push(connection);
        self.available.notify_one();
    }
}

fn close_connections(connections: Vec<Connection>) -> Vec<DbError> {
    connections
        .into_iter()
        .filter_map(|connection| connection.close().err())
        .map(|(_, error)| DbError::Sqlite(error))
        .collect()
}

pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    connection: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("pooled connection is only taken on drop"),
        }
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("pooled connection is only taken on drop"),
        }
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: u32,
    pub name: String,
    pub path: PathBuf,
}

/// Collects `<version>_<name>.up.sql` files from `dir`, ordered by version.
pub fn load_migrations(dir: &Path) -> Result<Vec<Migration>, DbError> {
    let mut migrations = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(UP_MIGRATION_SUFFIX) else {
            continue;
        };

        let (raw_version, name) = stem.split_once('_').unwrap_or((stem, ""));
        let version = raw_version
            .parse::<u32>()
            .map_err(|error| DbError::InvalidMigration {
                path: path.clone(),
                reason: format!("version prefix {raw_version:?} is not a number: {error}"),
            })?;
        if version == 0 {
            return Err(DbError::InvalidMigration {
                path,
                reason: "version 0 is reserved for an empty database".to_string(),
            });
        }

        let migration = Migration {
            version,
            name: name.to_string(),
            path: path.clone(),
        };
        if let Some(existing) = migrations.insert(version, migration) {
            return Err(DbError::InvalidMigration {
                path,
                reason: format!(
                    "version {version} already defined by {}",
                    existing.path.display()
                ),
            });
        }
    }

    Ok(migrations.into_values().collect())
}

/// Applies pending migrations from `dir` and returns the resulting schema
/// version. Running it again with nothing pending is a no-op.
pub fn run_migrations(connection: &mut Connection, dir: &Path) -> Result<u32, DbError> {
    let migrations = load_migrations(dir)?;
    let latest = migrations.last().map_or(0, |migration| migration.version);
    let current_version = schema_version(connection)?;

    if current_version > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest,
        });
    }

    let transaction = connection.transaction()?;

    for migration in migrations
        .iter()
        .filter(|migration| migration.version > current_version)
    {
        let sql = std::fs::read_to_string(&migration.path)?;
        transaction.execute_batch(&sql)?;
        transaction.pragma_update(None, "user_version", migration.version)?;
        tracing::info!(
            version = migration.version,
            name = %migration.name,
            "applied database migration"
        );
    }

    transaction.commit()?;

    Ok(latest)
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{
        ConnectionPool, DbError, load_migrations, open_connection, run_migrations, schema_version,
    };
    use crate::test_support::{migrations_dir, temp_db_path};

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("migration file should be writable");
        path
    }

    #[test]
    fn migrates_fresh_database_to_latest_version() {
        let db_path = temp_db_path("fresh");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        let latest =
            run_migrations(&mut connection, &migrations_dir()).expect("migrations should succeed");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, latest);
        assert_eq!(version, 1);

        let table_exists: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='persons'",
                [],
                |row| row.get(0),
            )
            .expect("persons table check should work");
        assert_eq!(table_exists, 1);
    }

    #[test]
    fn migrations_are_idempotent() {
        let db_path = temp_db_path("idempotent");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        run_migrations(&mut connection, &migrations_dir())
            .expect("first migration run should succeed");
        run_migrations(&mut connection, &migrations_dir())
            .expect("second migration run should succeed");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, 1);
    }

    #[test]
    fn keeps_existing_data_when_migrations_rerun() {
        let db_path = temp_db_path("rerun");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        run_migrations(&mut connection, &migrations_dir())
            .expect("first migration run should succeed");

        connection
            .execute(
                "INSERT INTO persons (fname, lname, email) VALUES ('read', 'person', 'read.person@mailbox.com')",
                [],
            )
            .expect("insert should succeed");

        run_migrations(&mut connection, &migrations_dir())
            .expect("second migration run should succeed");

        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))
            .expect("count query should succeed");
        assert_eq!(count, 1);
    }

    #[test]
    fn applies_only_pending_migrations_in_version_order() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        write_file(
            dir.path(),
            "000002_add_index.up.sql",
            "CREATE INDEX idx_things_name ON things (name);",
        );
        write_file(
            dir.path(),
            "000001_create_things.up.sql",
            "CREATE TABLE things (id INTEGER PRIMARY KEY, name TEXT NOT NULL);",
        );
        write_file(dir.path(), "000001_create_things.down.sql", "DROP TABLE things;");
        write_file(dir.path(), "README.md", "not a migration");

        let migrations = load_migrations(dir.path()).expect("migrations should load");
        let versions: Vec<u32> = migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(migrations[0].name, "create_things");

        let db_path = temp_db_path("ordered");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        let latest = run_migrations(&mut connection, dir.path()).expect("migrations should apply");
        assert_eq!(latest, 2);

        write_file(
            dir.path(),
            "000003_add_column.up.sql",
            "ALTER TABLE things ADD COLUMN note TEXT;",
        );
        let latest = run_migrations(&mut connection, dir.path()).expect("third should apply");
        assert_eq!(latest, 3);
        assert_eq!(schema_version(&connection).expect("version"), 3);
    }

    #[test]
    fn rejects_duplicate_and_malformed_versions() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        write_file(dir.path(), "1_first.up.sql", "SELECT 1;");
        write_file(dir.path(), "0001_again.up.sql", "SELECT 1;");

        let result = load_migrations(dir.path());
        assert!(matches!(result, Err(DbError::InvalidMigration { .. })));

        let dir = tempfile::tempdir().expect("tempdir should be created");
        write_file(dir.path(), "initial_schema.up.sql", "SELECT 1;");

        let result = load_migrations(dir.path());
        assert!(matches!(result, Err(DbError::InvalidMigration { .. })));
    }

    #[test]
    fn rejects_database_newer_than_migrations() {
        let db_path = temp_db_path("newer");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        connection
            .pragma_update(None, "user_version", 9_u32)
            .expect("user_version should be settable");

        let result = run_migrations(&mut connection, &migrations_dir());

        assert!(matches!(
            result,
            Err(DbError::UnsupportedSchemaVersion {
                current: 9,
                latest: 1
            })
        ));
    }

    #[test]
    fn failed_migration_leaves_version_untouched() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        write_file(
            dir.path(),
            "000001_create_things.up.sql",
            "CREATE TABLE things (id INTEGER PRIMARY KEY);",
        );
        write_file(dir.path(), "000002_broken.up.sql", "CREATE TABLE (;");

        let db_path = temp_db_path("broken");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        assert!(run_migrations(&mut connection, dir.path()).is_err());
        assert_eq!(schema_version(&connection).expect("version"), 0);
    }

    #[test]
    fn pool_hands_connection_back_on_drop() {
        let db_path = temp_db_path("pool-release");
        let pool = ConnectionPool::open(
            db_path.to_string_lossy().as_ref(),
            1,
            Duration::from_millis(50),
        )
        .expect("pool should open");

        {
            let connection = pool.acquire().expect("first checkout should succeed");
            connection
                .execute_batch("CREATE TABLE t (x INTEGER);")
                .expect("statement should run");
        }

        let connection = pool.acquire().expect("connection should be back in the pool");
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .expect("query should run");
        assert_eq!(count, 0);
    }

    #[test]
    fn pool_times_out_when_exhausted() {
        let db_path = temp_db_path("pool-timeout");
        let pool = ConnectionPool::open(
            db_path.to_string_lossy().as_ref(),
            1,
            Duration::from_millis(20),
        )
        .expect("pool should open");

        let _held = pool.acquire().expect("first checkout should succeed");
        let result = pool.acquire();

        assert!(matches!(result, Err(DbError::PoolTimeout(_))));
    }

    #[test]
    fn pool_wakes_waiter_when_connection_is_released() {
        let db_path = temp_db_path("pool-wake");
        let pool = Arc::new(
            ConnectionPool::open(db_path.to_string_lossy().as_ref(), 1, Duration::from_secs(5))
                .expect("pool should open"),
        );

        let held = pool.acquire().expect("first checkout should succeed");
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire().map(|_| ()).is_ok())
        };

        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert!(waiter.join().expect("waiter thread should finish"));
    }

    #[test]
    fn close_drains_idle_connections() {
        let db_path = temp_db_path("pool-close");
        let pool = ConnectionPool::open(
            db_path.to_string_lossy().as_ref(),
            2,
            Duration::from_millis(10),
        )
        .expect("pool should open");

        assert_eq!(pool.size(), 2);
        assert!(pool.close().is_empty());
        assert!(matches!(pool.acquire(), Err(DbError::PoolClosed)));
    }

    #[test]
    fn connections_checked_out_during_close_are_not_handed_out_again() {
        let db_path = temp_db_path("pool-close-checked-out");
        let pool = ConnectionPool::open(
            db_path.to_string_lossy().as_ref(),
            1,
            Duration::from_millis(10),
        )
        .expect("pool should open");

        let held = pool.acquire().expect("checkout should succeed");
        assert!(pool.close().is_empty());
        drop(held);

        assert!(matches!(pool.acquire(), Err(DbError::PoolClosed)));
    }

    #[test]
    fn close_wakes_waiting_callers() {
        let db_path = temp_db_path("pool-close-waiter");
        let pool = Arc::new(
            ConnectionPool::open(db_path.to_string_lossy().as_ref(), 1, Duration::from_secs(5))
                .expect("pool should open"),
        );

        let held = pool.acquire().expect("checkout should succeed");
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || matches!(pool.acquire(), Err(DbError::PoolClosed)))
        };

        thread::sleep(Duration::from_millis(20));
        assert!(pool.close().is_empty());

        assert!(waiter.join().expect("waiter thread should finish"));
        drop(held);
    }
}
