//! Payment records.
//!
//! One `Payment` exists per external transaction id. Its unique key is what
//! makes crediting a purchase at-most-once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, UserId};

/// Which code path confirmed the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    /// Signed webhook from the payment provider.
    Webhook,

    /// The client asked us to look the payment up after checkout.
    ClientConfirm,
}

impl PaymentSource {
    /// Get the source name as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::ClientConfirm => "client_confirm",
        }
    }
}

impl fmt::Display for PaymentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentSource {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "client_confirm" => Ok(Self::ClientConfirm),
            other => Err(LedgerError::UnknownPaymentSource(other.to_string())),
        }
    }
}

/// A credited payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Provider transaction id (idempotency key).
    pub external_transaction_id: String,

    /// The user who was credited.
    pub user_id: UserId,

    /// Credits added to the balance.
    pub credits: i64,

    /// Amount charged in the smallest currency unit, when known.
    pub amount_paid_cents: Option<i64>,

    /// ISO currency code, when known.
    pub currency: Option<String>,

    /// Which path recorded it first.
    pub source: PaymentSource,

    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

/// A confirmed purchase waiting to be credited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCredit {
    /// Provider transaction id (idempotency key).
    pub external_transaction_id: String,

    /// The user to credit.
    pub user_id: UserId,

    /// Credits to add. Must be positive.
    pub credits: i64,

    /// Amount charged in the smallest currency unit, when known.
    pub amount_paid_cents: Option<i64>,

    /// ISO currency code, when known.
    pub currency: Option<String>,

    /// Which path is recording it.
    pub source: PaymentSource,
}

impl PaymentCredit {
    /// Reject credits that would not increase the balance.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` if `credits <= 0` or the id is empty.
    pub fn validate(&self) -> crate::Result<()> {
        if self.external_transaction_id.trim().is_empty() {
            return Err(LedgerError::InvalidAmount(
                "missing external transaction id".into(),
            ));
        }
        if self.credits <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "credit amount must be positive, got {}",
                self.credits
            )));
        }
        Ok(())
    }

    /// Build the payment row recorded for this credit.
    #[must_use]
    pub fn to_payment(&self, now: DateTime<Utc>) -> Payment {
        Payment {
            external_transaction_id: self.external_transaction_id.clone(),
            user_id: self.user_id,
            credits: self.credits,
            amount_paid_cents: self.amount_paid_cents,
            currency: self.currency.clone(),
            source: self.source,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(credits: i64) -> PaymentCredit {
        PaymentCredit {
            external_transaction_id: "tx_abc".into(),
            user_id: UserId::generate(),
            credits,
            amount_paid_cents: Some(500),
            currency: Some("mxn".into()),
            source: PaymentSource::Webhook,
        }
    }

    #[test]
    fn non_positive_credits_are_rejected() {
        assert!(credit(0).validate().is_err());
        assert!(credit(-3).validate().is_err());
        assert!(credit(5).validate().is_ok());
    }

    #[test]
    fn blank_transaction_id_is_rejected() {
        let mut c = credit(5);
        c.external_transaction_id = "  ".into();
        assert!(c.validate().is_err());
    }
}
