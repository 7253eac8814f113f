//! SQLite connection pooling (r2d2).

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use super::error::StoreResult;
use super::schema::apply_schema;

/// Type alias for the connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const FILE_POOL_SIZE: u32 = 8;

/// Opens (or creates) the database file and applies the schema.
///
/// Every pooled connection enables foreign keys (entry and lock rows cascade with
/// their TM) and WAL so readers do not block the writer.
pub fn open_file_pool(path: &Path) -> StoreResult<DbPool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Ok(())
    });

    let pool = Pool::builder().max_size(FILE_POOL_SIZE).build(manager)?;
    apply_schema(&*pool.get()?)?;
    Ok(pool)
}

/// Opens a private in-memory database.
///
/// The pool holds exactly one long-lived connection: each in-memory connection is
/// its own database, so recycling it would lose the data.
pub fn open_memory_pool() -> StoreResult<DbPool> {
    let manager = SqliteConnectionManager::memory().with_init(|conn| {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    });

    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)?;
    apply_schema(&*pool.get()?)?;
    Ok(pool)
}
