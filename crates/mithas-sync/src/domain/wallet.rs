//! Wallet: the balance entity plus one entity per transaction.
//!
//! Payments and transfers only touch the balance optimistically; the
//! transaction record arrives as a side effect of the confirmation (or over
//! realtime). Transaction history is paged: a refresh only carries the
//! newest page, so older transactions are never swept by it.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::StoreOptions;
use crate::error::{Result, ValidationError};
use crate::storage::PersistenceBackend;
use crate::sync::{MutationHandle, Page, PageReport, RemoteCall, RemoteResult, SyncStore};
use crate::types::{Confirmation, EntityId, MutationKind, Record, ServerRecord};

use super::Domain;

/// Entity id of the wallet balance.
pub const BALANCE_ENTITY: &str = "balance";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: i64,
    pub pending: i64,
    pub currency: String,
    pub total_earned: i64,
    pub total_spent: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: String,
    pub amount: i64,
    pub direction: Direction,
    pub description: String,
    #[serde(default)]
    pub reference_id: Option<String>,
    /// Unix milliseconds.
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WalletEntry {
    Balance(Balance),
    Transaction(WalletTransaction),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount: i64,
    pub description: String,
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub recipient_id: String,
    pub amount: i64,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletIntent {
    Pay(PaymentRequest),
    Transfer(TransferRequest),
}

impl WalletIntent {
    pub fn amount(&self) -> i64 {
        match self {
            WalletIntent::Pay(p) => p.amount,
            WalletIntent::Transfer(t) => t.amount,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletSummary {
    /// `None` until the balance has been loaded.
    pub balance: Option<i64>,
    pub pending_balance: i64,
    pub currency: Option<String>,
    pub transaction_count: usize,
}

pub struct Wallet;

impl Domain for Wallet {
    type Payload = WalletEntry;
    type Intent = WalletIntent;
    type Aggregates = WalletSummary;

    const NAME: &'static str = "wallet";

    fn target(_: &WalletIntent) -> EntityId {
        BALANCE_ENTITY.to_string()
    }

    fn kind(_: &WalletIntent, _: Option<&WalletEntry>) -> MutationKind {
        MutationKind::Update
    }

    fn check(intent: &WalletIntent) -> std::result::Result<(), ValidationError> {
        if intent.amount() <= 0 {
            return Err(ValidationError::new("amount", "a positive amount", intent.amount()));
        }
        if let WalletIntent::Transfer(t) = intent {
            if t.recipient_id.trim().is_empty() {
                return Err(ValidationError::new("recipient_id", "a recipient", "\"\""));
            }
        }
        Ok(())
    }

    fn apply(
        intent: &WalletIntent,
        current: Option<&WalletEntry>,
    ) -> std::result::Result<Option<WalletEntry>, ValidationError> {
        let Some(WalletEntry::Balance(balance)) = current else {
            return Err(ValidationError::new(
                "balance",
                "a loaded wallet balance",
                "none",
            ));
        };
        let amount = intent.amount();
        if amount > balance.available {
            return Err(ValidationError::new(
                "amount",
                format!("at most the available balance of {}", balance.available),
                amount,
            ));
        }

        let total_spent = balance.total_spent.checked_add(amount).ok_or_else(|| {
            ValidationError::new("amount", "a total spent within range", amount)
        })?;

        Ok(Some(WalletEntry::Balance(Balance {
            available: balance.available - amount,
            total_spent,
            ..balance.clone()
        })))
    }

    fn aggregate(records: &BTreeMap<EntityId, Record<WalletEntry>>) -> WalletSummary {
        let mut summary = WalletSummary::default();
        for record in records.values() {
            match &record.payload {
                WalletEntry::Balance(b) => {
                    summary.balance = Some(b.available);
                    summary.pending_balance = b.pending;
                    summary.currency = Some(b.currency.clone());
                }
                WalletEntry::Transaction(_) => summary.transaction_count += 1,
            }
        }
        summary
    }

    fn swept_by_refresh(payload: &WalletEntry) -> bool {
        matches!(payload, WalletEntry::Balance(_))
    }
}

// ============================================================================
// Remote API
// ============================================================================

/// Wallet endpoints. A payment or transfer reply carries the new balance as
/// its primary event and the created transaction as a side effect.
#[async_trait]
pub trait WalletApi: Send + Sync {
    async fn pay(&self, request: &PaymentRequest) -> RemoteResult<Confirmation<WalletEntry>>;

    async fn transfer(&self, request: &TransferRequest) -> RemoteResult<Confirmation<WalletEntry>>;

    /// The balance and the first page of transactions.
    async fn fetch_wallet(&self) -> RemoteResult<Vec<ServerRecord<WalletEntry>>>;

    /// Transactions, newest first, numbered from page 1.
    async fn fetch_transactions(&self, page: u32) -> RemoteResult<Page<WalletEntry>>;
}

#[async_trait]
impl<T: WalletApi> RemoteCall<Wallet> for T {
    async fn commit(&self, intent: &WalletIntent) -> RemoteResult<Confirmation<WalletEntry>> {
        match intent {
            WalletIntent::Pay(request) => self.pay(request).await,
            WalletIntent::Transfer(request) => self.transfer(request).await,
        }
    }

    async fn fetch(&self) -> RemoteResult<Vec<ServerRecord<WalletEntry>>> {
        self.fetch_wallet().await
    }

    async fn fetch_page(&self, page: u32) -> RemoteResult<Page<WalletEntry>> {
        self.fetch_transactions(page).await
    }
}

// ============================================================================
// WalletStore
// ============================================================================

struct Paging {
    /// Last page merged. Page 1 arrives with every refresh.
    page: u32,
    has_more: bool,
}

pub struct WalletStore {
    store: SyncStore<Wallet>,
    paging: Mutex<Paging>,
}

impl WalletStore {
    pub fn new(
        remote: Arc<dyn RemoteCall<Wallet>>,
        options: StoreOptions,
        backend: Option<Arc<dyn PersistenceBackend>>,
    ) -> Self {
        Self {
            store: SyncStore::new(remote, options, backend),
            paging: Mutex::new(Paging {
                page: 1,
                has_more: true,
            }),
        }
    }

    pub fn pay(&self, request: PaymentRequest) -> Result<MutationHandle<WalletEntry>> {
        self.store.dispatch(WalletIntent::Pay(request))
    }

    pub fn transfer(&self, request: TransferRequest) -> Result<MutationHandle<WalletEntry>> {
        self.store.dispatch(WalletIntent::Transfer(request))
    }

    pub fn balance(&self) -> Option<Balance> {
        match self.store.get(BALANCE_ENTITY)?.payload {
            WalletEntry::Balance(balance) => Some(balance),
            WalletEntry::Transaction(_) => None,
        }
    }

    /// Fetch the next page of older transactions. Returns `None` once the
    /// authority has reported the last page.
    pub async fn load_more_transactions(&self) -> Result<Option<PageReport>> {
        let next = {
            let paging = self.paging.lock();
            if !paging.has_more {
                return Ok(None);
            }
            paging.page + 1
        };

        let report = self.store.load_page(next).await?;
        let mut paging = self.paging.lock();
        if next > paging.page {
            paging.page = next;
            paging.has_more = report.has_more;
        }
        Ok(Some(report))
    }

    pub fn has_more_transactions(&self) -> bool {
        self.paging.lock().has_more
    }

    /// Known transactions, newest first.
    pub fn transactions(&self) -> Vec<WalletTransaction> {
        let mut transactions: Vec<WalletTransaction> = self
            .store
            .state()
            .records
            .into_values()
            .filter_map(|r| match r.payload {
                WalletEntry::Transaction(tx) => Some(tx),
                WalletEntry::Balance(_) => None,
            })
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        transactions
    }
}

impl Deref for WalletStore {
    type Target = SyncStore<Wallet>;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}
