//! WalletStore against an in-process wallet service.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use mithas_sync::config::StoreOptions;
use mithas_sync::domain::wallet::{
    Balance, Direction, PaymentRequest, TransferRequest, WalletApi, WalletEntry,
    WalletTransaction, BALANCE_ENTITY,
};
use mithas_sync::domain::{Wallet, WalletStore};
use mithas_sync::error::{RemoteError, SyncError};
use mithas_sync::sync::{Page, RemoteCall, RemoteResult};
use mithas_sync::types::{Confirmation, Origin, RemoteEvent, ServerRecord};

use crate::support::ManualTransport;

// ============================================================================
// Fake wallet service
// ============================================================================

struct ServerWallet {
    balance: Balance,
    sequence: u64,
    transactions: Vec<WalletTransaction>,
    /// Server-side holds the client cannot see.
    frozen: bool,
}

struct FakeWalletService {
    inner: Mutex<ServerWallet>,
}

impl FakeWalletService {
    fn with_balance(available: i64) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ServerWallet {
                balance: balance(available),
                sequence: 1,
                transactions: Vec::new(),
                frozen: false,
            }),
        })
    }

    /// Add `count` older credits to the server's history.
    fn with_history(available: i64, count: usize) -> Arc<Self> {
        let service = Self::with_balance(available);
        {
            let mut wallet = service.inner.lock();
            for n in 0..count {
                wallet.transactions.push(WalletTransaction {
                    id: format!("tx-old-{n}"),
                    amount: 10,
                    direction: Direction::Credit,
                    description: "Cashback".to_string(),
                    reference_id: None,
                    created_at: 1_600_000_000_000 + n as u64,
                });
            }
        }
        service
    }

    fn freeze(&self) {
        self.inner.lock().frozen = true;
    }

    fn debit(
        &self,
        amount: i64,
        description: String,
        reference_id: Option<String>,
    ) -> RemoteResult<Confirmation<WalletEntry>> {
        let mut wallet = self.inner.lock();
        if wallet.frozen {
            return Err(RemoteError::rejected("wallet frozen"));
        }
        if amount > wallet.balance.available {
            return Err(RemoteError::rejected("insufficient funds"));
        }
        wallet.balance.available -= amount;
        wallet.balance.total_spent += amount;
        wallet.sequence += 1;

        let tx = WalletTransaction {
            id: format!("tx-{}", wallet.transactions.len() + 1),
            amount,
            direction: Direction::Debit,
            description,
            reference_id,
            created_at: 1_700_000_000_000 + wallet.transactions.len() as u64,
        };
        wallet.transactions.push(tx.clone());

        Ok(Confirmation::of(RemoteEvent::put(
            BALANCE_ENTITY,
            WalletEntry::Balance(wallet.balance.clone()),
            wallet.sequence,
        ))
        .with_side_effect(RemoteEvent::put(tx.id.clone(), WalletEntry::Transaction(tx), 1)))
    }
}

#[async_trait]
impl WalletApi for FakeWalletService {
    async fn pay(&self, request: &PaymentRequest) -> RemoteResult<Confirmation<WalletEntry>> {
        self.debit(request.amount, request.description.clone(), request.reference_id.clone())
    }

    async fn transfer(&self, request: &TransferRequest) -> RemoteResult<Confirmation<WalletEntry>> {
        self.debit(
            request.amount,
            format!("transfer to {}", request.recipient_id),
            None,
        )
    }

    async fn fetch_wallet(&self) -> RemoteResult<Vec<ServerRecord<WalletEntry>>> {
        let mut records = vec![{
            let wallet = self.inner.lock();
            ServerRecord::new(
                BALANCE_ENTITY,
                WalletEntry::Balance(wallet.balance.clone()),
                wallet.sequence,
            )
        }];
        records.extend(self.fetch_transactions(1).await?.records);
        Ok(records)
    }

    async fn fetch_transactions(&self, page: u32) -> RemoteResult<Page<WalletEntry>> {
        let wallet = self.inner.lock();
        let mut newest_first = wallet.transactions.clone();
        newest_first.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let start = (page as usize - 1) * PAGE_SIZE;
        let records = newest_first
            .iter()
            .skip(start)
            .take(PAGE_SIZE)
            .map(|tx| ServerRecord::new(tx.id.clone(), WalletEntry::Transaction(tx.clone()), 1))
            .collect();
        Ok(Page::new(records, start + PAGE_SIZE < newest_first.len()))
    }
}

const PAGE_SIZE: usize = 2;

// ============================================================================
// Helpers
// ============================================================================

fn balance(available: i64) -> Balance {
    Balance {
        available,
        pending: 0,
        currency: "INR".to_string(),
        total_earned: available,
        total_spent: 0,
    }
}

fn payment(amount: i64) -> PaymentRequest {
    PaymentRequest {
        amount,
        description: "Order #42".to_string(),
        reference_id: Some("order-42".to_string()),
    }
}

/// Wallet store with its balance loaded from the service.
async fn loaded_wallet(service: &Arc<FakeWalletService>) -> WalletStore {
    let remote: Arc<dyn RemoteCall<Wallet>> = service.clone();
    let wallet = WalletStore::new(remote, StoreOptions::default(), None);
    wallet.refresh().await.unwrap();
    wallet
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn payment_debits_and_records_the_transaction() {
    let service = FakeWalletService::with_balance(1_000);
    let wallet = loaded_wallet(&service).await;

    let handle = wallet.pay(payment(300)).unwrap();
    assert_eq!(wallet.balance().unwrap().available, 700);
    assert!(wallet.transactions().is_empty());

    handle.await.unwrap();

    let balance = wallet.balance().unwrap();
    assert_eq!(balance.available, 700);
    assert_eq!(balance.total_spent, 300);
    assert_eq!(wallet.get(BALANCE_ENTITY).unwrap().origin, Origin::Confirmed);

    let transactions = wallet.transactions();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].reference_id.as_deref(), Some("order-42"));
    assert_eq!(wallet.aggregates().transaction_count, 1);
}

#[tokio::test]
async fn overspending_is_refused_synchronously() {
    let service = FakeWalletService::with_balance(500);
    let wallet = loaded_wallet(&service).await;

    let err = wallet.pay(payment(501)).err().unwrap();

    assert!(matches!(err, SyncError::Validation(ref v) if v.path == "amount"));
    assert_eq!(wallet.balance().unwrap().available, 500);
    assert_eq!(wallet.pending_count(), 0);
}

#[tokio::test]
async fn paying_before_the_balance_loads_is_refused() {
    let service = FakeWalletService::with_balance(500);
    let remote: Arc<dyn RemoteCall<Wallet>> = service.clone();
    let wallet = WalletStore::new(remote, StoreOptions::default(), None);

    let err = wallet.pay(payment(10)).err().unwrap();
    assert!(matches!(err, SyncError::Validation(ref v) if v.path == "balance"));
    assert_eq!(wallet.aggregates().balance, None);
}

#[tokio::test]
async fn server_rejection_restores_the_balance() {
    let service = FakeWalletService::with_balance(1_000);
    let wallet = loaded_wallet(&service).await;
    service.freeze();

    let handle = wallet
        .transfer(TransferRequest {
            recipient_id: "U2".to_string(),
            amount: 400,
            note: None,
        })
        .unwrap();
    assert_eq!(wallet.balance().unwrap().available, 600);

    let err = handle.await.unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejected { ref reason, .. } if reason == "wallet frozen"));
    assert_eq!(wallet.balance().unwrap(), balance(1_000));
    assert!(wallet.transactions().is_empty());
}

#[tokio::test]
async fn queued_payment_is_checked_against_the_settled_balance() {
    let service = FakeWalletService::with_balance(1_000);
    let wallet = loaded_wallet(&service).await;

    let first = wallet.pay(payment(700)).unwrap();
    let second = wallet.pay(payment(700)).unwrap();

    first.await.unwrap();
    let err = second.await.unwrap_err();

    assert!(matches!(err, SyncError::Validation(ref v) if v.path == "amount"));
    assert_eq!(wallet.balance().unwrap().available, 300);
    assert_eq!(wallet.transactions().len(), 1);
}

#[tokio::test]
async fn incoming_credit_arrives_over_realtime() {
    let service = FakeWalletService::with_balance(100);
    let wallet = loaded_wallet(&service).await;
    let transport = ManualTransport::<WalletEntry>::new();
    let _unsubscribe = wallet.subscribe_realtime(&transport, "wallet:U1");

    let mut credited = balance(100);
    credited.available = 350;
    credited.total_earned = 350;
    transport.push("wallet:U1", RemoteEvent::put(BALANCE_ENTITY, WalletEntry::Balance(credited), 2));
    transport.push(
        "wallet:U1",
        RemoteEvent::put(
            "tx-credit-1",
            WalletEntry::Transaction(WalletTransaction {
                id: "tx-credit-1".to_string(),
                amount: 250,
                direction: Direction::Credit,
                description: "Refund".to_string(),
                reference_id: None,
                created_at: 1_800_000_000_000,
            }),
            1,
        ),
    );

    assert_eq!(wallet.aggregates().balance, Some(350));
    let transactions = wallet.transactions();
    assert_eq!(transactions[0].direction, Direction::Credit);
}

#[tokio::test]
async fn older_transactions_load_page_by_page_and_survive_refresh() {
    let service = FakeWalletService::with_history(100, 5);
    let wallet = loaded_wallet(&service).await;
    assert_eq!(wallet.transactions().len(), 2);
    assert!(wallet.has_more_transactions());

    let second = wallet.load_more_transactions().await.unwrap().unwrap();
    assert_eq!(second.page, 2);
    assert_eq!(second.report.applied, 2);
    assert!(second.has_more);

    let third = wallet.load_more_transactions().await.unwrap().unwrap();
    assert_eq!(third.report.applied, 1);
    assert!(!third.has_more);
    assert!(wallet.load_more_transactions().await.unwrap().is_none());

    let report = wallet.refresh().await.unwrap();
    assert_eq!(report.removed, 0);
    let transactions = wallet.transactions();
    assert_eq!(transactions.len(), 5);
    assert_eq!(transactions[0].id, "tx-old-4");
    assert_eq!(transactions[4].id, "tx-old-0");
}
