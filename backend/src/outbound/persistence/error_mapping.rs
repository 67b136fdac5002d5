//! Translation of pool and Diesel failures into port error constructors.

use tracing::debug;

use super::pool::PoolError;

/// Route a pool failure to the port's connection variant.
pub(super) fn pool_failure<E>(error: PoolError, connection: impl FnOnce(String) -> E) -> E {
    let message = match error {
        PoolError::Checkout { message }
        | PoolError::Build { message }
        | PoolError::Migration { message } => message,
    };
    connection(message)
}

/// Route a Diesel failure to the port's query or connection variant.
///
/// Database messages are logged at debug level and replaced by generic text
/// so SQL details never reach callers.
pub(super) fn diesel_failure<E>(
    error: diesel::result::Error,
    query: impl FnOnce(&'static str) -> E,
    connection: impl FnOnce(&'static str) -> E,
) -> E {
    use diesel::result::{DatabaseErrorKind, Error as DieselError};

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
            debug!(message = info.message(), "database connection closed");
            connection("database connection error")
        }
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), "diesel operation failed");
            query("database error")
        }
        DieselError::NotFound => query("record not found"),
        other => {
            debug!(error = %other, "diesel operation failed");
            query("database error")
        }
    }
}

/// Convert a stored BIGINT back to a cursor value.
pub(super) fn stored_cursor(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

/// Convert a cursor to BIGINT; provider ids beyond `i64::MAX` are rejected.
pub(super) fn storable_cursor(value: u64) -> Option<i64> {
    i64::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Some(0))]
    #[case(105, Some(105))]
    #[case(u64::MAX, None)]
    fn cursors_fit_bigint(#[case] cursor: u64, #[case] expected: Option<i64>) {
        assert_eq!(storable_cursor(cursor), expected);
    }

    #[rstest]
    fn negative_rows_are_rejected() {
        assert_eq!(stored_cursor(-1), None);
    }

    #[rstest]
    fn not_found_maps_to_query() {
        let mapped = diesel_failure(
            diesel::result::Error::NotFound,
            |m| format!("query: {m}"),
            |m| format!("connection: {m}"),
        );
        assert_eq!(mapped, "query: record not found");
    }
}
