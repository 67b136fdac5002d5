//! Internal Diesel row structs. Never exposed to the domain.

use chrono::{DateTime, Utc};
use diesel::prelude::*;

use super::schema::{account_watches, sync_cursors};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = account_watches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct AccountWatchRow {
    pub account_id: String,
    pub user_id: String,
    pub mailbox_address: String,
    pub provider_cursor: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = account_watches)]
pub(crate) struct AccountWatchWrite<'a> {
    pub account_id: &'a str,
    pub user_id: &'a str,
    pub mailbox_address: &'a str,
    pub provider_cursor: i64,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sync_cursors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub(crate) struct SyncCursorRow {
    pub account_id: String,
    pub last_cursor: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sync_cursors)]
pub(crate) struct SyncCursorWrite<'a> {
    pub account_id: &'a str,
    pub last_cursor: i64,
    pub updated_at: DateTime<Utc>,
}
