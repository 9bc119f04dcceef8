//! Table and column definitions for the PostgreSQL backend.
//!
//! The DDL lives in `migrations/`; this module keeps the column lists used by
//! queries in one place so row structs and `SELECT`s stay in step.

/// Table names.
pub mod table {
    /// Credit accounts, keyed by `user_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Vehicle and business listings, keyed by `id`.
    pub const LISTINGS: &str = "listings";

    /// Append-only ledger, keyed by `id` (ULID text).
    pub const LEDGER_ENTRIES: &str = "ledger_entries";

    /// Credited payments, keyed by `external_transaction_id`.
    pub const PAYMENTS: &str = "payments";
}

/// Columns selected for an account row.
pub const ACCOUNT_COLUMNS: &str =
    "user_id, email, credit_balance, is_admin, created_at, updated_at";

/// Columns selected for a listing row.
pub const LISTING_COLUMNS: &str =
    "id, owner_id, kind, title, is_active, expires_at, is_free_publication, created_at, updated_at";

/// Columns selected for a ledger row.
pub const LEDGER_COLUMNS: &str = "id, user_id, amount, kind, balance_after, description, \
     listing_id, external_transaction_id, created_at";

/// Columns selected for a payment row.
pub const PAYMENT_COLUMNS: &str =
    "external_transaction_id, user_id, credits, amount_paid_cents, currency, source, created_at";

/// Returns all table names in creation order.
#[must_use]
pub fn all_tables() -> Vec<&'static str> {
    vec![
        table::ACCOUNTS,
        table::LISTINGS,
        table::PAYMENTS,
        table::LEDGER_ENTRIES,
    ]
}
