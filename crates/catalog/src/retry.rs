//! Immediate-mode transaction helper with bounded exponential backoff
//! retry on lock-contention error classes (§4.5, §9).

use rowvault_core::error::Error;
use rowvault_core::limits::{RETRY_INITIAL_BACKOFF_MS, RETRY_MAX_ATTEMPTS};
use rusqlite::{Connection, TransactionBehavior};
use std::thread;
use std::time::Duration;

/// Error message families that indicate transient SQLite contention and
/// are safe to retry (§9).
const RETRYABLE_FRAGMENTS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "cannot start a transaction within a transaction",
    "busy",
    "schema is locked",
    "table is locked",
];

fn is_retryable(err: &rusqlite::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    RETRYABLE_FRAGMENTS.iter().any(|f| msg.contains(f))
}

/// Run `body` inside a `BEGIN IMMEDIATE` transaction, retrying with
/// exponential backoff (starting at [`RETRY_INITIAL_BACKOFF_MS`], doubling
/// each attempt, bounded by [`RETRY_MAX_ATTEMPTS`]) when SQLite reports
/// lock contention. `body` receives the open transaction and must not
/// commit it itself.
pub fn with_immediate_txn<T>(
    conn: &mut Connection,
    mut body: impl FnMut(&rusqlite::Transaction<'_>) -> rusqlite::Result<T>,
) -> Result<T, Error> {
    let mut backoff_ms = RETRY_INITIAL_BACKOFF_MS;
    for attempt in 0..RETRY_MAX_ATTEMPTS {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Catalog(e.to_string()))?;
        match body(&tx) {
            Ok(value) => {
                tx.commit().map_err(|e| Error::Catalog(e.to_string()))?;
                return Ok(value);
            }
            Err(e) if is_retryable(&e) && attempt + 1 < RETRY_MAX_ATTEMPTS => {
                drop(tx); // rolls back
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
                continue;
            }
            Err(e) => return Err(Error::Catalog(e.to_string())),
        }
    }
    Err(Error::Catalog(
        "exceeded retry budget for immediate transaction".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_lock_contention_messages() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(5),
            Some("database is locked".to_string()),
        );
        assert!(is_retryable(&err));
    }

    #[test]
    fn does_not_retry_unrelated_errors() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(19),
            Some("UNIQUE constraint failed".to_string()),
        );
        assert!(!is_retryable(&err));
    }

    #[test]
    fn commits_successful_body_and_returns_its_value() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t(x INTEGER)", []).unwrap();
        let result = with_immediate_txn(&mut conn, |tx| {
            tx.execute("INSERT INTO t(x) VALUES (1)", [])?;
            Ok(42)
        })
        .unwrap();
        assert_eq!(result, 42);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
