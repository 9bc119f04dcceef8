//! PostgreSQL storage implementation.
//!
//! Compound operations run in one transaction. Rows are locked with
//! `SELECT ... FOR UPDATE` in a fixed order (listing, then account) so the
//! sweeper and owner requests never deadlock each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use uuid::Uuid;

use carmatch_core::{
    Account, EntryId, EntryKind, LedgerEntry, LedgerError, Listing, ListingId, ListingKind,
    NewListing, Payment, PaymentCredit, PaymentSource, PublicationDecision, PublicationPolicy,
    PublisherContext, ReactivationDecision, RenewalDecision, UserId,
};

use crate::error::{Result, StoreError};
use crate::outcome::{PaymentOutcome, PublishOutcome, ReactivateOutcome, RenewalOutcome};
use crate::schema::{self, table, ACCOUNT_COLUMNS, LEDGER_COLUMNS, LISTING_COLUMNS, PAYMENT_COLUMNS};
use crate::Store;

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the pool cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        tracing::info!(tables = ?schema::all_tables(), "Database migrations applied");
        Ok(())
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct AccountRow {
    user_id: Uuid,
    email: Option<String>,
    credit_balance: i64,
    is_admin: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            user_id: UserId::from_uuid(row.user_id),
            email: row.email,
            credit_balance: row.credit_balance,
            is_admin: row.is_admin,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    owner_id: Uuid,
    kind: String,
    title: String,
    is_active: bool,
    expires_at: Option<DateTime<Utc>>,
    is_free_publication: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ListingRow> for Listing {
    type Error = StoreError;

    fn try_from(row: ListingRow) -> Result<Self> {
        Ok(Self {
            id: ListingId::from_uuid(row.id),
            owner_id: UserId::from_uuid(row.owner_id),
            kind: row.kind.parse::<ListingKind>()?,
            title: row.title,
            is_active: row.is_active,
            expires_at: row.expires_at,
            is_free_publication: row.is_free_publication,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    id: String,
    user_id: Uuid,
    amount: i64,
    kind: String,
    balance_after: i64,
    description: String,
    listing_id: Option<Uuid>,
    external_transaction_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(Self {
            id: row.id.parse::<EntryId>().map_err(LedgerError::from)?,
            user_id: UserId::from_uuid(row.user_id),
            amount: row.amount,
            kind: row.kind.parse::<EntryKind>()?,
            balance_after: row.balance_after,
            description: row.description,
            listing_id: row.listing_id.map(ListingId::from_uuid),
            external_transaction_id: row.external_transaction_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    external_transaction_id: String,
    user_id: Uuid,
    credits: i64,
    amount_paid_cents: Option<i64>,
    currency: Option<String>,
    source: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self> {
        Ok(Self {
            external_transaction_id: row.external_transaction_id,
            user_id: UserId::from_uuid(row.user_id),
            credits: row.credits,
            amount_paid_cents: row.amount_paid_cents,
            currency: row.currency,
            source: row.source.parse::<PaymentSource>()?,
            created_at: row.created_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_unique_violation())
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ============================================================================
// Transaction helpers
// ============================================================================

async fn lock_account(conn: &mut PgConnection, user_id: &UserId) -> Result<Account> {
    let row: Option<AccountRow> = sqlx::query_as(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM {} WHERE user_id = $1 FOR UPDATE",
        table::ACCOUNTS
    ))
    .bind(user_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Account::from)
        .ok_or_else(|| StoreError::account_not_found(user_id))
}

async fn lock_listing(conn: &mut PgConnection, listing_id: &ListingId) -> Result<Option<Listing>> {
    let row: Option<ListingRow> = sqlx::query_as(&format!(
        "SELECT {LISTING_COLUMNS} FROM {} WHERE id = $1 FOR UPDATE",
        table::LISTINGS
    ))
    .bind(listing_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Listing::try_from).transpose()
}

async fn insert_listing(conn: &mut PgConnection, listing: &Listing) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {} ({LISTING_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        table::LISTINGS
    ))
    .bind(listing.id.as_uuid())
    .bind(listing.owner_id.as_uuid())
    .bind(listing.kind.as_str())
    .bind(&listing.title)
    .bind(listing.is_active)
    .bind(listing.expires_at)
    .bind(listing.is_free_publication)
    .bind(listing.created_at)
    .bind(listing.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn update_listing_state(conn: &mut PgConnection, listing: &Listing) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE {} SET is_active = $2, expires_at = $3, is_free_publication = $4, updated_at = $5 \
         WHERE id = $1",
        table::LISTINGS
    ))
    .bind(listing.id.as_uuid())
    .bind(listing.is_active)
    .bind(listing.expires_at)
    .bind(listing.is_free_publication)
    .bind(listing.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_ledger_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO {} ({LEDGER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        table::LEDGER_ENTRIES
    ))
    .bind(entry.id.to_string())
    .bind(entry.user_id.as_uuid())
    .bind(entry.amount)
    .bind(entry.kind.as_str())
    .bind(entry.balance_after)
    .bind(&entry.description)
    .bind(entry.listing_id.map(|id| *id.as_uuid()))
    .bind(entry.external_transaction_id.as_deref())
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn set_balance(
    conn: &mut PgConnection,
    user_id: &UserId,
    balance: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE {} SET credit_balance = $2, updated_at = $3 WHERE user_id = $1",
        table::ACCOUNTS
    ))
    .bind(user_id.as_uuid())
    .bind(balance)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Debit `cost` from the owner of `listing` and append the entry.
///
/// The account row must already be locked by the caller.
async fn debit(
    conn: &mut PgConnection,
    kind: EntryKind,
    cost: i64,
    listing: &Listing,
    now: DateTime<Utc>,
) -> Result<LedgerEntry> {
    if cost <= 0 {
        return Err(StoreError::Invalid(format!(
            "listing charge must be positive, got {cost}"
        )));
    }

    let balance: Option<i64> = sqlx::query_scalar(&format!(
        "UPDATE {} SET credit_balance = credit_balance - $2, updated_at = $3 \
         WHERE user_id = $1 AND credit_balance >= $2 RETURNING credit_balance",
        table::ACCOUNTS
    ))
    .bind(listing.owner_id.as_uuid())
    .bind(cost)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(balance) = balance else {
        let current = lock_account(conn, &listing.owner_id).await?.credit_balance;
        return Err(StoreError::InsufficientCredits {
            balance: current,
            required: cost,
        });
    };

    let entry = LedgerEntry::listing_charge(
        kind,
        listing.owner_id,
        cost,
        balance,
        listing.id,
        listing.kind,
        now,
    )?;
    insert_ledger_entry(conn, &entry).await?;
    Ok(entry)
}

#[async_trait]
impl Store for PgStore {
    async fn create_account(&self, account: &Account) -> Result<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} ({ACCOUNT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)",
            table::ACCOUNTS
        ))
        .bind(account.user_id.as_uuid())
        .bind(account.email.as_deref())
        .bind(account.credit_balance)
        .bind(account.is_admin)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.user_id.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM {} WHERE user_id = $1",
            table::ACCOUNTS
        ))
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Account::from))
    }

    async fn get_listing(&self, listing_id: &ListingId) -> Result<Option<Listing>> {
        let row: Option<ListingRow> = sqlx::query_as(&format!(
            "SELECT {LISTING_COLUMNS} FROM {} WHERE id = $1",
            table::LISTINGS
        ))
        .bind(listing_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Listing::try_from).transpose()
    }

    async fn list_listings_by_owner(
        &self,
        owner_id: &UserId,
        kind: Option<ListingKind>,
    ) -> Result<Vec<Listing>> {
        let rows: Vec<ListingRow> = sqlx::query_as(&format!(
            "SELECT {LISTING_COLUMNS} FROM {} \
             WHERE owner_id = $1 AND ($2::TEXT IS NULL OR kind = $2) \
             ORDER BY created_at DESC",
            table::LISTINGS
        ))
        .bind(owner_id.as_uuid())
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Listing::try_from).collect()
    }

    async fn list_expired_listings(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE is_active AND expires_at < $1 ORDER BY expires_at",
            table::LISTINGS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(ListingId::from_uuid).collect())
    }

    async fn delete_listing(&self, listing_id: &ListingId) -> Result<()> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = $1", table::LISTINGS))
            .bind(listing_id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::listing_not_found(listing_id));
        }
        Ok(())
    }

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!(
            "SELECT {LEDGER_COLUMNS} FROM {} WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            table::LEDGER_ENTRIES
        ))
        .bind(user_id.as_uuid())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn ledger_total(&self, user_id: &UserId) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM {} WHERE user_id = $1",
            table::LEDGER_ENTRIES
        ))
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn get_payment(&self, external_transaction_id: &str) -> Result<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM {} WHERE external_transaction_id = $1",
            table::PAYMENTS
        ))
        .bind(external_transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Payment::try_from).transpose()
    }

    async fn publish_listing(
        &self,
        draft: NewListing,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome> {
        let mut tx = self.pool.begin().await?;

        let account = lock_account(&mut tx, &draft.owner_id).await?;
        let has_prior: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE owner_id = $1 AND kind = $2)",
            table::LISTINGS
        ))
        .bind(draft.owner_id.as_uuid())
        .bind(draft.kind.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let decision = policy.decide_publication(
            draft.kind,
            PublisherContext {
                is_admin: account.is_admin,
                is_first_of_kind: !has_prior,
                balance: account.credit_balance,
            },
            now,
        )?;

        let listing = draft.into_listing(
            decision.is_active(),
            decision.expires_at(),
            decision.is_free(),
            now,
        );
        insert_listing(&mut tx, &listing).await?;

        let (entry, free_reason) = match decision {
            PublicationDecision::Charge { cost, .. } => (
                Some(debit(&mut tx, EntryKind::Publication, cost, &listing, now).await?),
                None,
            ),
            PublicationDecision::Free { reason, .. } => (None, Some(reason)),
            PublicationDecision::Inactive { .. } => (None, None),
        };

        tx.commit().await?;

        tracing::debug!(
            listing_id = %listing.id,
            owner_id = %listing.owner_id,
            active = listing.is_active,
            charged = entry.is_some(),
            "Listing published"
        );

        Ok(PublishOutcome {
            balance: entry
                .as_ref()
                .map_or(account.credit_balance, |e| e.balance_after),
            listing,
            entry,
            free_reason,
        })
    }

    async fn deactivate_listing(
        &self,
        listing_id: &ListingId,
        now: DateTime<Utc>,
    ) -> Result<Listing> {
        let row: Option<ListingRow> = sqlx::query_as(&format!(
            "UPDATE {} SET updated_at = CASE WHEN is_active THEN $2 ELSE updated_at END, \
             is_active = FALSE WHERE id = $1 RETURNING {LISTING_COLUMNS}",
            table::LISTINGS
        ))
        .bind(listing_id.as_uuid())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Listing::try_from)
            .transpose()?
            .ok_or_else(|| StoreError::listing_not_found(listing_id))
    }

    async fn reactivate_listing(
        &self,
        listing_id: &ListingId,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<ReactivateOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut listing = lock_listing(&mut tx, listing_id)
            .await?
            .ok_or_else(|| StoreError::listing_not_found(listing_id))?;
        let account = lock_account(&mut tx, &listing.owner_id).await?;

        let mut entry = None;
        match policy.decide_reactivation(&listing, account.is_admin, account.credit_balance, now)? {
            ReactivationDecision::AlreadyActive => {
                tx.rollback().await?;
                return Ok(ReactivateOutcome {
                    listing,
                    entry: None,
                    balance: account.credit_balance,
                });
            }
            ReactivationDecision::Insufficient { balance, required } => {
                tx.rollback().await?;
                return Err(StoreError::InsufficientCredits { balance, required });
            }
            ReactivationDecision::Resume => {}
            ReactivationDecision::ExtendFree { expires_at } => {
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = true;
            }
            ReactivationDecision::Charge { cost, expires_at } => {
                entry = Some(debit(&mut tx, EntryKind::Reactivation, cost, &listing, now).await?);
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = false;
            }
        }

        listing.is_active = true;
        listing.updated_at = now;
        update_listing_state(&mut tx, &listing).await?;
        tx.commit().await?;

        Ok(ReactivateOutcome {
            balance: entry
                .as_ref()
                .map_or(account.credit_balance, |e| e.balance_after),
            listing,
            entry,
        })
    }

    async fn renew_listing(
        &self,
        listing_id: &ListingId,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<RenewalOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut listing = match lock_listing(&mut tx, listing_id).await? {
            Some(listing) if listing.is_due_for_renewal(now) => listing,
            _ => {
                tx.rollback().await?;
                return Ok(RenewalOutcome::Skipped);
            }
        };
        let account = lock_account(&mut tx, &listing.owner_id).await?;

        let outcome = match policy.decide_renewal(account.is_admin, account.credit_balance, now)? {
            RenewalDecision::ExtendFree { expires_at } => {
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = true;
                listing.updated_at = now;
                update_listing_state(&mut tx, &listing).await?;
                RenewalOutcome::Renewed {
                    listing,
                    entry: None,
                    balance: account.credit_balance,
                }
            }
            RenewalDecision::Charge { cost, expires_at } => {
                let entry = debit(&mut tx, EntryKind::Renewal, cost, &listing, now).await?;
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = false;
                listing.updated_at = now;
                update_listing_state(&mut tx, &listing).await?;
                RenewalOutcome::Renewed {
                    listing,
                    balance: entry.balance_after,
                    entry: Some(entry),
                }
            }
            RenewalDecision::Deactivate => {
                listing.is_active = false;
                listing.updated_at = now;
                update_listing_state(&mut tx, &listing).await?;
                RenewalOutcome::Deactivated { listing }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn record_payment(
        &self,
        credit: &PaymentCredit,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome> {
        credit.validate()?;

        if let Some(payment) = self.get_payment(&credit.external_transaction_id).await? {
            return Ok(PaymentOutcome::AlreadyProcessed { payment });
        }

        let mut tx = self.pool.begin().await?;
        let account = lock_account(&mut tx, &credit.user_id).await?;

        let payment = credit.to_payment(now);
        let inserted = sqlx::query(&format!(
            "INSERT INTO {} ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (external_transaction_id) DO NOTHING",
            table::PAYMENTS
        ))
        .bind(&payment.external_transaction_id)
        .bind(payment.user_id.as_uuid())
        .bind(payment.credits)
        .bind(payment.amount_paid_cents)
        .bind(payment.currency.as_deref())
        .bind(payment.source.as_str())
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await?;
            let payment = self
                .get_payment(&credit.external_transaction_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Database("payment vanished after conflicting insert".into())
                })?;
            return Ok(PaymentOutcome::AlreadyProcessed { payment });
        }

        let balance = account
            .credit_balance
            .checked_add(credit.credits)
            .ok_or_else(|| StoreError::Invalid("credit balance overflow".into()))?;
        set_balance(&mut tx, &credit.user_id, balance, now).await?;

        let entry = LedgerEntry::purchase(
            credit.user_id,
            credit.credits,
            balance,
            credit.external_transaction_id.clone(),
            now,
        );
        insert_ledger_entry(&mut tx, &entry).await?;

        match tx.commit().await {
            Ok(()) => Ok(PaymentOutcome::Credited {
                payment,
                entry,
                balance,
            }),
            Err(err) if is_unique_violation(&err) => {
                let payment = self
                    .get_payment(&credit.external_transaction_id)
                    .await?
                    .unwrap_or(payment);
                Ok(PaymentOutcome::AlreadyProcessed { payment })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn adjust_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(LedgerEntry, i64)> {
        if amount == 0 {
            return Err(StoreError::Invalid("adjustment amount must not be zero".into()));
        }

        let mut tx = self.pool.begin().await?;
        let account = lock_account(&mut tx, user_id).await?;

        let balance = account
            .credit_balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Invalid("credit balance overflow".into()))?;
        if balance < 0 {
            tx.rollback().await?;
            return Err(StoreError::InsufficientCredits {
                balance: account.credit_balance,
                required: -amount,
            });
        }

        set_balance(&mut tx, user_id, balance, now).await?;
        let entry = LedgerEntry::admin_adjustment(*user_id, amount, balance, reason.to_string(), now);
        insert_ledger_entry(&mut tx, &entry).await?;
        tx.commit().await?;

        Ok((entry, balance))
    }
}
