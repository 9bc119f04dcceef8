//! Account types for the CarMatch ledger.
//!
//! An account holds a user's credit balance. The balance is only changed by the
//! store, inside the same transaction that appends the matching ledger entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// A marketplace user's credit account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The user ID (token `sub` claim).
    pub user_id: UserId,

    /// Contact email, if known.
    pub email: Option<String>,

    /// Current credit balance. Never negative.
    pub credit_balance: i64,

    /// Admins publish for free for the admin period.
    pub is_admin: bool,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(user_id: UserId, email: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            email,
            credit_balance: 0,
            is_admin: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the account as an administrator.
    #[must_use]
    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }
}
