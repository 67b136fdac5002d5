//! Diesel table definitions matching `backend/migrations`.

diesel::table! {
    /// Provider push registrations, one per connected account.
    account_watches (account_id) {
        account_id -> Text,
        user_id -> Text,
        /// Lowercased; unique so push notifications resolve to one account.
        mailbox_address -> Text,
        provider_cursor -> Int8,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Reconciliation watermark per account.
    sync_cursors (account_id) {
        account_id -> Text,
        last_cursor -> Int8,
        updated_at -> Timestamptz,
    }
}
