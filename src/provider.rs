//! The single SQLite connection shared by every component.
//!
//! Callers borrow the connection for the duration of one operation through
//! [`SqliteProvider::with_connection`]; the lock serializes operations, so an
//! insert and its identifier lookup can never interleave with another call.

use rusqlite::{Batch, Connection, Statement};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, IdStrategy};
use crate::error::{acquire_lock, GatewayError, Result};

pub struct SqliteProvider {
    connection: Mutex<Option<Connection>>,
    id_strategy: IdStrategy,
}

impl SqliteProvider {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.is_in_memory() {
            Connection::open_in_memory()?
        } else {
            Connection::open(&config.path)?
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if let (false, Some(mode)) = (config.is_in_memory(), config.journal_mode.as_deref()) {
            let applied: String =
                conn.pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))?;
            debug!(requested = mode, applied = %applied, "journal mode set");
        }
        info!(path = %config.path, id_strategy = ?config.id_strategy, "sqlite connection opened");
        Ok(Self::from_connection(conn, config.id_strategy))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&DatabaseConfig::in_memory())
    }

    pub fn from_connection(conn: Connection, id_strategy: IdStrategy) -> Self {
        Self {
            connection: Mutex::new(Some(conn)),
            id_strategy,
        }
    }

    pub fn id_strategy(&self) -> IdStrategy {
        self.id_strategy
    }

    /// False once closed or if a previous holder panicked with the lock.
    pub fn is_available(&self) -> bool {
        self.connection
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn ping(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
    }

    /// Runs `f` with exclusive use of the connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = acquire_lock(&self.connection)?;
        let conn = guard.as_mut().ok_or(GatewayError::ConnectionUnavailable)?;
        f(conn)
    }

    /// Closes the connection; later calls fail with `ConnectionUnavailable`.
    pub fn close(&self) -> Result<()> {
        let mut guard = acquire_lock(&self.connection)?;
        if let Some(conn) = guard.take() {
            if let Err((conn, err)) = conn.close() {
                warn!(error = %err, "sqlite connection failed to close");
                *guard = Some(conn);
                return Err(err.into());
            }
            info!("sqlite connection closed");
        }
        Ok(())
    }
}

/// Prepares `sql`, refusing anything but exactly one statement.
///
/// Trailing whitespace, semicolons and comments are not statements. Any
/// other tail after the first statement, even one that does not prepare,
/// makes the command stacked.
pub fn prepare_single<'conn>(conn: &'conn Connection, sql: &str) -> Result<Statement<'conn>> {
    let mut batch = Batch::new(conn, sql);
    let stmt = batch.next()?.ok_or(GatewayError::EmptyStatement)?;
    match batch.next() {
        Ok(None) => Ok(stmt),
        Ok(Some(_)) | Err(_) => Err(GatewayError::MultipleStatements),
    }
}
