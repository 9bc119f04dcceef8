//! In-memory storage implementation.
//!
//! Every operation holds one async mutex guard for its whole duration and
//! validates before mutating, so a failed operation leaves no partial state.
//! Data does not survive a restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use carmatch_core::{
    Account, EntryKind, LedgerEntry, Listing, ListingId, ListingKind, NewListing, Payment,
    PaymentCredit, PublicationDecision, PublicationPolicy, PublisherContext, ReactivationDecision,
    RenewalDecision, UserId,
};

use crate::error::{Result, StoreError};
use crate::outcome::{PaymentOutcome, PublishOutcome, ReactivateOutcome, RenewalOutcome};
use crate::Store;

#[derive(Debug, Default)]
struct Inner {
    accounts: HashMap<UserId, Account>,
    listings: HashMap<ListingId, Listing>,
    /// Append order; iterate in reverse for newest first.
    ledger: Vec<LedgerEntry>,
    payments: HashMap<String, Payment>,
}

impl Inner {
    fn account(&self, user_id: &UserId) -> Result<&Account> {
        self.accounts
            .get(user_id)
            .ok_or_else(|| StoreError::account_not_found(user_id))
    }

    /// Debit `cost` for `listing` and append the entry.
    fn debit(
        &mut self,
        kind: EntryKind,
        cost: i64,
        listing: &Listing,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        let account = self
            .accounts
            .get_mut(&listing.owner_id)
            .ok_or_else(|| StoreError::account_not_found(listing.owner_id))?;

        if account.credit_balance < cost {
            return Err(StoreError::InsufficientCredits {
                balance: account.credit_balance,
                required: cost,
            });
        }

        let entry = LedgerEntry::listing_charge(
            kind,
            listing.owner_id,
            cost,
            account.credit_balance - cost,
            listing.id,
            listing.kind,
            now,
        )?;
        account.credit_balance = entry.balance_after;
        account.updated_at = now;
        self.ledger.push(entry.clone());
        Ok(entry)
    }
}

/// Store backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.accounts.contains_key(&account.user_id) {
            return Err(StoreError::AlreadyExists {
                entity: "account",
                id: account.user_id.to_string(),
            });
        }
        inner.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>> {
        Ok(self.inner.lock().await.accounts.get(user_id).cloned())
    }

    async fn get_listing(&self, listing_id: &ListingId) -> Result<Option<Listing>> {
        Ok(self.inner.lock().await.listings.get(listing_id).cloned())
    }

    async fn list_listings_by_owner(
        &self,
        owner_id: &UserId,
        kind: Option<ListingKind>,
    ) -> Result<Vec<Listing>> {
        let inner = self.inner.lock().await;
        let mut listings: Vec<Listing> = inner
            .listings
            .values()
            .filter(|l| l.owner_id == *owner_id && kind.map_or(true, |k| l.kind == k))
            .cloned()
            .collect();
        listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listings)
    }

    async fn list_expired_listings(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>> {
        let inner = self.inner.lock().await;
        let mut expired: Vec<&Listing> = inner
            .listings
            .values()
            .filter(|l| l.is_due_for_renewal(now))
            .collect();
        expired.sort_by_key(|l| l.expires_at);
        Ok(expired.into_iter().map(|l| l.id).collect())
    }

    async fn delete_listing(&self, listing_id: &ListingId) -> Result<()> {
        self.inner
            .lock()
            .await
            .listings
            .remove(listing_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::listing_not_found(listing_id))
    }

    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == *user_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ledger_total(&self, user_id: &UserId) -> Result<i64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ledger
            .iter()
            .filter(|e| e.user_id == *user_id)
            .map(|e| e.amount)
            .sum())
    }

    async fn get_payment(&self, external_transaction_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .inner
            .lock()
            .await
            .payments
            .get(external_transaction_id)
            .cloned())
    }

    async fn publish_listing(
        &self,
        draft: NewListing,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome> {
        let mut inner = self.inner.lock().await;

        let account = inner.account(&draft.owner_id)?;
        let (is_admin, balance) = (account.is_admin, account.credit_balance);
        let is_first_of_kind = !inner
            .listings
            .values()
            .any(|l| l.owner_id == draft.owner_id && l.kind == draft.kind);

        let decision = policy.decide_publication(
            draft.kind,
            PublisherContext {
                is_admin,
                is_first_of_kind,
                balance,
            },
            now,
        )?;

        let listing = draft.into_listing(
            decision.is_active(),
            decision.expires_at(),
            decision.is_free(),
            now,
        );

        let (entry, free_reason) = match decision {
            PublicationDecision::Charge { cost, .. } => (
                Some(inner.debit(EntryKind::Publication, cost, &listing, now)?),
                None,
            ),
            PublicationDecision::Free { reason, .. } => (None, Some(reason)),
            PublicationDecision::Inactive { .. } => (None, None),
        };

        inner.listings.insert(listing.id, listing.clone());

        Ok(PublishOutcome {
            balance: entry.as_ref().map_or(balance, |e| e.balance_after),
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
        let mut inner = self.inner.lock().await;
        let listing = inner
            .listings
            .get_mut(listing_id)
            .ok_or_else(|| StoreError::listing_not_found(listing_id))?;

        if listing.is_active {
            listing.is_active = false;
            listing.updated_at = now;
        }
        Ok(listing.clone())
    }

    async fn reactivate_listing(
        &self,
        listing_id: &ListingId,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<ReactivateOutcome> {
        let mut inner = self.inner.lock().await;
        let mut listing = inner
            .listings
            .get(listing_id)
            .cloned()
            .ok_or_else(|| StoreError::listing_not_found(listing_id))?;
        let account = inner.account(&listing.owner_id)?;
        let (is_admin, balance) = (account.is_admin, account.credit_balance);

        let mut entry = None;
        match policy.decide_reactivation(&listing, is_admin, balance, now)? {
            ReactivationDecision::AlreadyActive => {
                return Ok(ReactivateOutcome {
                    listing,
                    entry: None,
                    balance,
                });
            }
            ReactivationDecision::Insufficient { balance, required } => {
                return Err(StoreError::InsufficientCredits { balance, required });
            }
            ReactivationDecision::Resume => {}
            ReactivationDecision::ExtendFree { expires_at } => {
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = true;
            }
            ReactivationDecision::Charge { cost, expires_at } => {
                entry = Some(inner.debit(EntryKind::Reactivation, cost, &listing, now)?);
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = false;
            }
        }

        listing.is_active = true;
        listing.updated_at = now;
        inner.listings.insert(listing.id, listing.clone());

        Ok(ReactivateOutcome {
            balance: entry.as_ref().map_or(balance, |e| e.balance_after),
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
        let mut inner = self.inner.lock().await;
        let mut listing = match inner.listings.get(listing_id) {
            Some(listing) if listing.is_due_for_renewal(now) => listing.clone(),
            _ => return Ok(RenewalOutcome::Skipped),
        };
        let account = inner.account(&listing.owner_id)?;
        let (is_admin, balance) = (account.is_admin, account.credit_balance);

        let outcome = match policy.decide_renewal(is_admin, balance, now)? {
            RenewalDecision::ExtendFree { expires_at } => {
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = true;
                listing.updated_at = now;
                RenewalOutcome::Renewed {
                    listing: listing.clone(),
                    entry: None,
                    balance,
                }
            }
            RenewalDecision::Charge { cost, expires_at } => {
                let entry = inner.debit(EntryKind::Renewal, cost, &listing, now)?;
                listing.expires_at = Some(expires_at);
                listing.is_free_publication = false;
                listing.updated_at = now;
                RenewalOutcome::Renewed {
                    listing: listing.clone(),
                    balance: entry.balance_after,
                    entry: Some(entry),
                }
            }
            RenewalDecision::Deactivate => {
                listing.is_active = false;
                listing.updated_at = now;
                RenewalOutcome::Deactivated {
                    listing: listing.clone(),
                }
            }
        };

        inner.listings.insert(listing.id, listing);
        Ok(outcome)
    }

    async fn record_payment(
        &self,
        credit: &PaymentCredit,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome> {
        credit.validate()?;
        let mut inner = self.inner.lock().await;

        if let Some(payment) = inner.payments.get(&credit.external_transaction_id) {
            return Ok(PaymentOutcome::AlreadyProcessed {
                payment: payment.clone(),
            });
        }

        let account = inner
            .accounts
            .get_mut(&credit.user_id)
            .ok_or_else(|| StoreError::account_not_found(credit.user_id))?;
        let balance = account
            .credit_balance
            .checked_add(credit.credits)
            .ok_or_else(|| StoreError::Invalid("credit balance overflow".into()))?;
        account.credit_balance = balance;
        account.updated_at = now;

        let entry = LedgerEntry::purchase(
            credit.user_id,
            credit.credits,
            balance,
            credit.external_transaction_id.clone(),
            now,
        );
        let payment = credit.to_payment(now);

        inner.ledger.push(entry.clone());
        inner
            .payments
            .insert(payment.external_transaction_id.clone(), payment.clone());

        Ok(PaymentOutcome::Credited {
            payment,
            entry,
            balance,
        })
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

        let mut inner = self.inner.lock().await;
        let account = inner
            .accounts
            .get_mut(user_id)
            .ok_or_else(|| StoreError::account_not_found(user_id))?;

        let balance = account
            .credit_balance
            .checked_add(amount)
            .ok_or_else(|| StoreError::Invalid("credit balance overflow".into()))?;
        if balance < 0 {
            return Err(StoreError::InsufficientCredits {
                balance: account.credit_balance,
                required: -amount,
            });
        }

        account.credit_balance = balance;
        account.updated_at = now;

        let entry = LedgerEntry::admin_adjustment(*user_id, amount, balance, reason.to_string(), now);
        inner.ledger.push(entry.clone());
        Ok((entry, balance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carmatch_core::{FreeReason, PaymentSource};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    async fn store_with_user(is_admin: bool) -> (MemoryStore, UserId) {
        let store = MemoryStore::new();
        let user_id = UserId::generate();
        let account = Account::new(user_id, Some("ana@example.com".into()), now()).with_admin(is_admin);
        store.create_account(&account).await.unwrap();
        (store, user_id)
    }

    fn draft(owner_id: UserId, kind: ListingKind) -> NewListing {
        NewListing {
            owner_id,
            kind,
            title: "Listing".into(),
        }
    }

    fn credit(user_id: UserId, id: &str, credits: i64) -> PaymentCredit {
        PaymentCredit {
            external_transaction_id: id.into(),
            user_id,
            credits,
            amount_paid_cents: Some(credits * 100),
            currency: Some("usd".into()),
            source: PaymentSource::Webhook,
        }
    }

    async fn assert_balanced(store: &MemoryStore, user_id: &UserId) {
        let balance = store.get_account(user_id).await.unwrap().unwrap().credit_balance;
        assert_eq!(balance, store.ledger_total(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_account_is_rejected() {
        let (store, user_id) = store_with_user(false).await;
        let err = store
            .create_account(&Account::new(user_id, None, now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn business_scenario_free_then_inactive_then_purchase() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy::default();

        let first = store
            .publish_listing(draft(user_id, ListingKind::Business), &policy, now())
            .await
            .unwrap();
        assert!(first.listing.is_active);
        assert_eq!(first.free_reason, Some(FreeReason::FirstOfKind));
        assert_eq!(
            first.listing.expires_at,
            Some(Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap())
        );

        let second = store
            .publish_listing(draft(user_id, ListingKind::Business), &policy, now())
            .await
            .unwrap();
        assert!(!second.listing.is_active);
        assert_eq!(second.listing.expires_at, Some(now()));
        assert!(second.entry.is_none());
        assert_eq!(second.balance, 0);

        let outcome = store
            .record_payment(&credit(user_id, "tx_abc", 5), now())
            .await
            .unwrap();
        assert!(outcome.is_credited());

        let replay = store
            .record_payment(&credit(user_id, "tx_abc", 5), now())
            .await
            .unwrap();
        assert!(!replay.is_credited());
        assert_eq!(replay.payment().credits, 5);

        let account = store.get_account(&user_id).await.unwrap().unwrap();
        assert_eq!(account.credit_balance, 5);
        assert_eq!(store.list_ledger_entries(&user_id, 10, 0).await.unwrap().len(), 1);
        assert_balanced(&store, &user_id).await;
    }

    #[tokio::test]
    async fn paid_publication_debits_one_credit() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy::default();
        store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap();
        store.adjust_credits(&user_id, 1, "promo", now()).await.unwrap();

        let outcome = store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap();

        assert!(outcome.listing.is_active);
        assert_eq!(outcome.balance, 0);
        let entry = outcome.entry.unwrap();
        assert_eq!(entry.amount, -1);
        assert_eq!(entry.kind, EntryKind::Publication);
        assert_eq!(entry.listing_id, Some(outcome.listing.id));
        assert_eq!(outcome.listing.expires_at, Some(now() + Duration::days(30)));
        assert_balanced(&store, &user_id).await;
    }

    #[tokio::test]
    async fn non_positive_charge_is_rejected_without_changes() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy {
            renewal_cost_credits: -1,
            ..PublicationPolicy::default()
        };
        store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap();

        let err = store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Invalid(_)));
        let account = store.get_account(&user_id).await.unwrap().unwrap();
        assert_eq!(account.credit_balance, 0);
        assert_eq!(
            store
                .list_listings_by_owner(&user_id, Some(ListingKind::Vehicle))
                .await
                .unwrap()
                .len(),
            1
        );
        assert_balanced(&store, &user_id).await;
    }

    #[tokio::test]
    async fn first_of_kind_is_tracked_per_kind() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy::default();
        store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap();

        let business = store
            .publish_listing(draft(user_id, ListingKind::Business), &policy, now())
            .await
            .unwrap();
        assert_eq!(business.free_reason, Some(FreeReason::FirstOfKind));
    }

    #[tokio::test]
    async fn sweep_twice_charges_once() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy::default();
        let published_at = now() - Duration::days(60);
        let listing = store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, published_at)
            .await
            .unwrap()
            .listing;
        store.adjust_credits(&user_id, 3, "promo", published_at).await.unwrap();

        let expired = store.list_expired_listings(now()).await.unwrap();
        assert_eq!(expired, vec![listing.id]);
        let outcome = store.renew_listing(&listing.id, &policy, now()).await.unwrap();
        assert!(matches!(outcome, RenewalOutcome::Renewed { balance: 2, .. }));

        assert!(store.list_expired_listings(now()).await.unwrap().is_empty());
        let again = store.renew_listing(&listing.id, &policy, now()).await.unwrap();
        assert!(matches!(again, RenewalOutcome::Skipped));

        let account = store.get_account(&user_id).await.unwrap().unwrap();
        assert_eq!(account.credit_balance, 2);
        assert_balanced(&store, &user_id).await;
    }

    #[tokio::test]
    async fn sweep_without_credit_deactivates_and_keeps_expiry() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy::default();
        let published_at = now() - Duration::days(60);
        let listing = store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, published_at)
            .await
            .unwrap()
            .listing;

        let outcome = store.renew_listing(&listing.id, &policy, now()).await.unwrap();
        let RenewalOutcome::Deactivated { listing: after } = outcome else {
            panic!("expected deactivation, got {outcome:?}");
        };
        assert!(!after.is_active);
        assert_eq!(after.expires_at, listing.expires_at);
        assert!(store.list_ledger_entries(&user_id, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reactivation_of_expired_listing_without_credit_fails_cleanly() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy::default();
        store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap();
        let inactive = store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap()
            .listing;

        let err = store
            .reactivate_listing(&inactive.id, &policy, now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientCredits {
                balance: 0,
                required: 1
            }
        ));
        let unchanged = store.get_listing(&inactive.id).await.unwrap().unwrap();
        assert!(!unchanged.is_active);

        store.adjust_credits(&user_id, 1, "promo", now()).await.unwrap();
        let outcome = store
            .reactivate_listing(&inactive.id, &policy, now())
            .await
            .unwrap();
        assert!(outcome.listing.is_active);
        assert_eq!(outcome.entry.unwrap().kind, EntryKind::Reactivation);
        assert_eq!(outcome.balance, 0);
        assert_balanced(&store, &user_id).await;
    }

    #[tokio::test]
    async fn deactivate_then_reactivate_with_time_left_is_free() {
        let (store, user_id) = store_with_user(false).await;
        let policy = PublicationPolicy::default();
        let listing = store
            .publish_listing(draft(user_id, ListingKind::Vehicle), &policy, now())
            .await
            .unwrap()
            .listing;

        let hidden = store.deactivate_listing(&listing.id, now()).await.unwrap();
        assert!(!hidden.is_active);
        assert_eq!(hidden.expires_at, listing.expires_at);

        let later = now() + Duration::days(3);
        let outcome = store.reactivate_listing(&listing.id, &policy, later).await.unwrap();
        assert!(outcome.listing.is_active);
        assert!(outcome.entry.is_none());
        assert_eq!(outcome.listing.expires_at, listing.expires_at);
    }

    #[tokio::test]
    async fn admin_listings_are_extended_for_free() {
        let (store, user_id) = store_with_user(true).await;
        let policy = PublicationPolicy::default();
        let long_ago = now() - Duration::days(4000);
        let listing = store
            .publish_listing(draft(user_id, ListingKind::Business), &policy, long_ago)
            .await
            .unwrap()
            .listing;

        let outcome = store.renew_listing(&listing.id, &policy, now()).await.unwrap();
        let RenewalOutcome::Renewed { entry, listing, .. } = outcome else {
            panic!("expected renewal, got {outcome:?}");
        };
        assert!(entry.is_none());
        assert_eq!(listing.expires_at, Some(now() + Duration::days(3650)));
    }

    #[tokio::test]
    async fn adjustment_cannot_make_balance_negative() {
        let (store, user_id) = store_with_user(false).await;
        store.adjust_credits(&user_id, 2, "promo", now()).await.unwrap();

        let err = store
            .adjust_credits(&user_id, -3, "chargeback", now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientCredits {
                balance: 2,
                required: 3
            }
        ));
        assert_balanced(&store, &user_id).await;
    }

    #[tokio::test]
    async fn payment_for_unknown_user_creates_nothing() {
        let store = MemoryStore::new();
        let err = store
            .record_payment(&credit(UserId::generate(), "tx_orphan", 5), now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.get_payment("tx_orphan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ledger_is_listed_newest_first() {
        let (store, user_id) = store_with_user(false).await;
        store.adjust_credits(&user_id, 1, "first", now()).await.unwrap();
        store.adjust_credits(&user_id, 2, "second", now()).await.unwrap();
        store.adjust_credits(&user_id, 3, "third", now()).await.unwrap();

        let page = store.list_ledger_entries(&user_id, 2, 0).await.unwrap();
        let descriptions: Vec<_> = page.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(descriptions, vec!["third", "second"]);

        let rest = store.list_ledger_entries(&user_id, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].description, "first");
    }
}
