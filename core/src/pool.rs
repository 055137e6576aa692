use std::path::Path;
use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OpenFlags};
use uuid::Uuid;

use crate::error::StoreError;

pub type Pool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A pool over a database file, in WAL mode.
pub fn open(path: &Path, size: usize) -> Result<Pool, StoreError> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        init_connection(conn)
    });
    build(manager, size, CHECKOUT_TIMEOUT)
}

/// A pool over a private shared-cache in-memory database. The database lives
/// as long as the pool holds a connection to it.
pub fn open_in_memory(size: usize) -> Result<Pool, StoreError> {
    let uri = format!("file:grocer-{}?mode=memory&cache=shared", Uuid::new_v4());
    let manager = SqliteConnectionManager::file(uri)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .with_init(init_connection);
    build(manager, size, CHECKOUT_TIMEOUT)
}

fn build(manager: SqliteConnectionManager, size: usize, timeout: Duration) -> Result<Pool, StoreError> {
    let size = u32::try_from(size.max(1)).unwrap_or(u32::MAX);
    let pool = r2d2::Pool::builder()
        .max_size(size)
        .min_idle(Some(size))
        .connection_timeout(timeout)
        // A shared in-memory database dies with its last connection
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)?;
    Ok(pool)
}

fn init_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    // LIKE only folds ASCII
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|s| casefold(&s)))
        },
    )
}

/// Case-insensitive form of `s`, matching the SQL `casefold` function.
pub fn casefold(s: &str) -> String {
    s.to_lowercase()
}
