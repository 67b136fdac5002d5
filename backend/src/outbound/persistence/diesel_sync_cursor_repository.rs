//! PostgreSQL-backed `SyncCursorRepository`.
//!
//! `advance` is a single upsert whose update branch only fires when the
//! incoming cursor is higher, so concurrent writers cannot regress the
//! watermark.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{QueryFragment, QueryId};
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use mockable::Clock;

use crate::domain::ports::{SyncCursorRepository, SyncCursorRepositoryError};
use crate::domain::{AccountId, HistoryCursor, SyncCursor};

use super::error_mapping::{diesel_failure, pool_failure, storable_cursor, stored_cursor};
use super::models::{SyncCursorRow, SyncCursorWrite};
use super::pool::{DbPool, PoolError};
use super::schema::sync_cursors;

/// Diesel implementation of [`SyncCursorRepository`].
#[derive(Clone)]
pub struct DieselSyncCursorRepository {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl DieselSyncCursorRepository {
    /// Create a repository over `pool`.
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn row(
        account_id: &AccountId,
        cursor: HistoryCursor,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<SyncCursorWrite<'_>, SyncCursorRepositoryError> {
        let last_cursor = storable_cursor(cursor.value())
            .ok_or_else(|| SyncCursorRepositoryError::query("cursor exceeds storable range"))?;
        Ok(SyncCursorWrite {
            account_id: account_id.as_str(),
            last_cursor,
            updated_at: now,
        })
    }
}

/// Upsert that only moves the stored watermark forward.
fn advance_upsert<'a>(row: &'a SyncCursorWrite<'a>) -> impl QueryFragment<Pg> + QueryId + Send + 'a {
    use diesel::query_dsl::methods::FilterDsl;

    diesel::insert_into(sync_cursors::table)
        .values(row)
        .on_conflict(sync_cursors::account_id)
        .do_update()
        .set((
            sync_cursors::last_cursor.eq(excluded(sync_cursors::last_cursor)),
            sync_cursors::updated_at.eq(excluded(sync_cursors::updated_at)),
        ))
        .filter(sync_cursors::last_cursor.lt(excluded(sync_cursors::last_cursor)))
}

/// Unconditional upsert used by explicit rebases.
fn reset_upsert<'a>(row: &'a SyncCursorWrite<'a>) -> impl QueryFragment<Pg> + QueryId + Send + 'a {
    diesel::insert_into(sync_cursors::table)
        .values(row)
        .on_conflict(sync_cursors::account_id)
        .do_update()
        .set((
            sync_cursors::last_cursor.eq(excluded(sync_cursors::last_cursor)),
            sync_cursors::updated_at.eq(excluded(sync_cursors::updated_at)),
        ))
}

fn map_pool_error(error: PoolError) -> SyncCursorRepositoryError {
    pool_failure(error, SyncCursorRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> SyncCursorRepositoryError {
    diesel_failure(
        error,
        SyncCursorRepositoryError::query,
        SyncCursorRepositoryError::connection,
    )
}

fn row_to_cursor(row: SyncCursorRow) -> Result<SyncCursor, SyncCursorRepositoryError> {
    let account_id = AccountId::new(row.account_id)
        .map_err(|error| SyncCursorRepositoryError::query(error.to_string()))?;
    let last_cursor = stored_cursor(row.last_cursor)
        .ok_or_else(|| SyncCursorRepositoryError::query("stored cursor is negative"))?;
    Ok(SyncCursor {
        account_id,
        last_cursor: HistoryCursor::new(last_cursor),
        updated_at: row.updated_at,
    })
}

#[async_trait]
impl SyncCursorRepository for DieselSyncCursorRepository {
    async fn load(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<SyncCursor>, SyncCursorRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<SyncCursorRow> = sync_cursors::table
            .filter(sync_cursors::account_id.eq(account_id.as_str()))
            .select(SyncCursorRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(row_to_cursor).transpose()
    }

    async fn advance(
        &self,
        account_id: &AccountId,
        cursor: HistoryCursor,
    ) -> Result<(), SyncCursorRepositoryError> {
        let row = Self::row(account_id, cursor, self.clock.utc())?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        advance_upsert(&row)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn reset(
        &self,
        account_id: &AccountId,
        cursor: HistoryCursor,
    ) -> Result<(), SyncCursorRepositoryError> {
        let row = Self::row(account_id, cursor, self.clock.utc())?;
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        reset_upsert(&row)
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }
}

#[cfg(test)]
mod tests {
    //! Query-shape coverage for the statements the repository executes.
    use super::*;
    use diesel::debug_query;
    use rstest::{fixture, rstest};

    #[fixture]
    fn row() -> SyncCursorWrite<'static> {
        SyncCursorWrite {
            account_id: "acct-1",
            last_cursor: 105,
            updated_at: chrono::Utc::now(),
        }
    }

    #[rstest]
    fn advance_only_updates_forward(row: SyncCursorWrite<'static>) {
        let sql = debug_query::<Pg, _>(&advance_upsert(&row)).to_string();

        assert!(sql.contains("ON CONFLICT"), "{sql}");
        assert!(sql.contains("DO UPDATE"), "{sql}");
        let (_, guard) = sql.split_once(" WHERE ").expect("update is guarded");
        assert!(
            guard.contains("\"last_cursor\" < excluded.\"last_cursor\""),
            "{sql}"
        );
    }

    #[rstest]
    fn reset_overwrites_unconditionally(row: SyncCursorWrite<'static>) {
        let sql = debug_query::<Pg, _>(&reset_upsert(&row)).to_string();

        assert!(sql.contains("DO UPDATE"), "{sql}");
        assert!(!sql.contains(" WHERE "), "{sql}");
    }

    #[test]
    fn rejects_unstorable_cursor() {
        let account = AccountId::new("acct-1").expect("valid account");
        let result =
            DieselSyncCursorRepository::row(&account, HistoryCursor::new(u64::MAX), chrono::Utc::now());
        assert!(matches!(result, Err(SyncCursorRepositoryError::Query { .. })));
    }
}
