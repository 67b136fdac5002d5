//! PostgreSQL-backed `AccountWatchRepository`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use mockable::Clock;
use tracing::warn;

use crate::domain::ports::{AccountWatchRepository, AccountWatchRepositoryError};
use crate::domain::{AccountId, AccountWatch, HistoryCursor, MailboxAddress, UserId};

use super::error_mapping::{diesel_failure, pool_failure, storable_cursor, stored_cursor};
use super::models::{AccountWatchRow, AccountWatchWrite};
use super::pool::{DbPool, PoolError};
use super::schema::account_watches;

/// Diesel implementation of [`AccountWatchRepository`].
#[derive(Clone)]
pub struct DieselAccountWatchRepository {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl DieselAccountWatchRepository {
    /// Create a repository over `pool`.
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

fn map_pool_error(error: PoolError) -> AccountWatchRepositoryError {
    pool_failure(error, AccountWatchRepositoryError::connection)
}

fn map_diesel_error(error: diesel::result::Error) -> AccountWatchRepositoryError {
    diesel_failure(
        error,
        AccountWatchRepositoryError::query,
        AccountWatchRepositoryError::connection,
    )
}

fn row_to_watch(row: AccountWatchRow) -> Result<AccountWatch, AccountWatchRepositoryError> {
    let invalid = |error: crate::domain::IdentifierValidationError| {
        AccountWatchRepositoryError::query(format!("stored watch is invalid: {error}"))
    };
    let provider_cursor = stored_cursor(row.provider_cursor)
        .ok_or_else(|| AccountWatchRepositoryError::query("stored cursor is negative"))?;
    Ok(AccountWatch {
        account_id: AccountId::new(row.account_id).map_err(invalid)?,
        user_id: UserId::new(row.user_id).map_err(invalid)?,
        mailbox_address: MailboxAddress::new(row.mailbox_address).map_err(invalid)?,
        provider_cursor: HistoryCursor::new(provider_cursor),
        expires_at: row.expires_at,
    })
}

/// Decode rows, skipping (and logging) any that no longer validate.
fn rows_to_watches(rows: Vec<AccountWatchRow>) -> Vec<AccountWatch> {
    rows.into_iter()
        .filter_map(|row| {
            let account_id = row.account_id.clone();
            row_to_watch(row)
                .map_err(|error| warn!(%account_id, %error, "skipping undecodable watch row"))
                .ok()
        })
        .collect()
}

#[async_trait]
impl AccountWatchRepository for DieselAccountWatchRepository {
    async fn find_by_mailbox(
        &self,
        mailbox: &MailboxAddress,
    ) -> Result<Option<AccountWatch>, AccountWatchRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<AccountWatchRow> = account_watches::table
            .filter(account_watches::mailbox_address.eq(mailbox.as_str()))
            .select(AccountWatchRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(row_to_watch).transpose()
    }

    async fn find(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<AccountWatch>, AccountWatchRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let row: Option<AccountWatchRow> = account_watches::table
            .filter(account_watches::account_id.eq(account_id.as_str()))
            .select(AccountWatchRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(map_diesel_error)?;

        row.map(row_to_watch).transpose()
    }

    async fn upsert(&self, watch: &AccountWatch) -> Result<(), AccountWatchRepositoryError> {
        let provider_cursor = storable_cursor(watch.provider_cursor.value())
            .ok_or_else(|| AccountWatchRepositoryError::query("cursor exceeds storable range"))?;
        let row = AccountWatchWrite {
            account_id: watch.account_id.as_str(),
            user_id: watch.user_id.as_str(),
            mailbox_address: watch.mailbox_address.as_str(),
            provider_cursor,
            expires_at: watch.expires_at,
            updated_at: self.clock.utc(),
        };
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        // The mailbox column is unique; a mailbox re-linked to another account
        // drops its previous registration first.
        diesel::delete(
            account_watches::table
                .filter(account_watches::mailbox_address.eq(row.mailbox_address))
                .filter(account_watches::account_id.ne(row.account_id)),
        )
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;

        diesel::insert_into(account_watches::table)
            .values(&row)
            .on_conflict(account_watches::account_id)
            .do_update()
            .set((
                account_watches::user_id.eq(excluded(account_watches::user_id)),
                account_watches::mailbox_address.eq(excluded(account_watches::mailbox_address)),
                account_watches::provider_cursor.eq(excluded(account_watches::provider_cursor)),
                account_watches::expires_at.eq(excluded(account_watches::expires_at)),
                account_watches::updated_at.eq(excluded(account_watches::updated_at)),
            ))
            .execute(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_diesel_error)
    }

    async fn delete(&self, account_id: &AccountId) -> Result<bool, AccountWatchRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let removed = diesel::delete(
            account_watches::table.filter(account_watches::account_id.eq(account_id.as_str())),
        )
        .execute(&mut conn)
        .await
        .map_err(map_diesel_error)?;
        Ok(removed > 0)
    }

    async fn list_expiring(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<AccountWatch>, AccountWatchRepositoryError> {
        let mut conn = self.pool.get().await.map_err(map_pool_error)?;

        let rows: Vec<AccountWatchRow> = account_watches::table
            .filter(account_watches::expires_at.le(before))
            .order(account_watches::expires_at.asc())
            .select(AccountWatchRow::as_select())
            .load(&mut conn)
            .await
            .map_err(map_diesel_error)?;

        Ok(rows_to_watches(rows))
    }
}
