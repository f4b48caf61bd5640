//! Mapping of `sqlx` errors into engine errors.
//!
//! `sqlx` types never cross the crate boundary. Transport failures and
//! transaction aborts the server asks the client to retry become
//! `Unavailable`; constraint violations are left to the caller, which knows
//! which constraint means what; everything else is `Storage`.

use dogwalk_core::error::EngineError;
use sqlx::error::ErrorKind;

/// SQLSTATE codes for which re-running the whole transaction may succeed.
const RETRYABLE_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57014", // query_canceled (statement_timeout)
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

/// A constraint violation reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Violation<'a> {
    Unique(Option<&'a str>),
    ForeignKey(Option<&'a str>),
    Check(Option<&'a str>),
}

/// The constraint violation behind `err`, if it is one.
pub(crate) fn violation(err: &sqlx::Error) -> Option<Violation<'_>> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    match db_err.kind() {
        ErrorKind::UniqueViolation => Some(Violation::Unique(db_err.constraint())),
        ErrorKind::ForeignKeyViolation => Some(Violation::ForeignKey(db_err.constraint())),
        ErrorKind::CheckViolation => Some(Violation::Check(db_err.constraint())),
        _ => None,
    }
}

/// Map an `sqlx` error raised while doing `context`.
pub(crate) fn map_sqlx_error(context: &str, err: sqlx::Error) -> EngineError {
    if is_retryable(&err) {
        tracing::debug!(context, error = %err, "Retryable database failure");
        return EngineError::Unavailable(format!("{context}: {err}"));
    }
    EngineError::Storage(format!("{context}: {err}"))
}

fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            // Class 08: connection exception
            code.starts_with("08") || RETRYABLE_SQLSTATES.contains(&&*code)
        }),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_unavailable() {
        let err = map_sqlx_error("begin", sqlx::Error::PoolTimedOut);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("begin"));
    }

    #[test]
    fn missing_row_is_storage() {
        let err = map_sqlx_error("load", sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), "storage");
        assert!(violation(&sqlx::Error::RowNotFound).is_none());
    }

    #[test]
    fn io_failure_is_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = map_sqlx_error("commit", sqlx::Error::Io(io));
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
