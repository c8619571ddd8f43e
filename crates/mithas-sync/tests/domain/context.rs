//! AppStores: building every store and refreshing them together.

use std::sync::Arc;

use mithas_sync::config::{AppConfig, DEFAULT_CART_PERSIST_KEY};
use mithas_sync::domain::cart::{CartEntry, Coupon, COUPON_ENTITY};
use mithas_sync::domain::{Cart, Chat, Reels, Wallet};
use mithas_sync::error::{RemoteError, SyncError};
use mithas_sync::storage::{MemoryBackend, PersistenceBackend};
use mithas_sync::types::{Confirmation, RemoteEvent, ServerRecord};
use mithas_sync::{AppStores, Remotes};

use crate::support::{remote_of, ScriptedRemote};

struct Fakes {
    cart: Arc<ScriptedRemote<Cart>>,
    wallet: Arc<ScriptedRemote<Wallet>>,
    reels: Arc<ScriptedRemote<Reels>>,
    chat: Arc<ScriptedRemote<Chat>>,
}

impl Fakes {
    fn new() -> Self {
        Self {
            cart: ScriptedRemote::new(),
            wallet: ScriptedRemote::new(),
            reels: ScriptedRemote::new(),
            chat: ScriptedRemote::new(),
        }
    }

    fn remotes(&self) -> Remotes {
        Remotes {
            cart: remote_of(&self.cart),
            wallet: remote_of(&self.wallet),
            reels: remote_of(&self.reels),
            chat: remote_of(&self.chat),
        }
    }
}

fn coupon(discount: i64) -> CartEntry {
    CartEntry::Coupon(Coupon {
        code: "SWEET100".to_string(),
        discount,
    })
}

#[tokio::test]
async fn default_config_persists_only_the_cart() {
    let fakes = Fakes::new();
    fakes.cart.on_commit(|_| Ok(Confirmation::of(RemoteEvent::put(COUPON_ENTITY, coupon(100), 1))));
    let memory = Arc::new(MemoryBackend::new());
    let backend: Arc<dyn PersistenceBackend> = memory.clone();

    let stores = AppStores::new(fakes.remotes(), Some(backend), &AppConfig::default()).unwrap();
    stores.cart.apply_coupon("SWEET100").unwrap().await.unwrap();
    stores
        .reels
        .apply_realtime(RemoteEvent::put("R1", Default::default(), 1));

    assert_eq!(memory.len(), 1);
    assert!(memory.get(DEFAULT_CART_PERSIST_KEY).unwrap().is_some());
    assert_eq!(stores.cart.totals().discount, 100);
}

#[tokio::test]
async fn refresh_all_reports_each_store() {
    let fakes = Fakes::new();
    fakes
        .cart
        .on_fetch(|| Ok(vec![ServerRecord::new(COUPON_ENTITY, coupon(50), 3)]));
    fakes
        .wallet
        .on_fetch(|| Err(RemoteError::network("wallet service unavailable")));

    let stores = AppStores::new(fakes.remotes(), None, &AppConfig::default()).unwrap();
    let results = stores.refresh_all().await;

    assert_eq!(results.cart.unwrap().applied, 1);
    assert!(matches!(results.wallet, Err(SyncError::Network { store: "wallet", .. })));
    assert_eq!(results.reels.unwrap().applied, 0);
    assert_eq!(results.chat.unwrap().applied, 0);
    assert_eq!(stores.cart.totals().discount, 50);
    assert_eq!(fakes.wallet.fetches(), 1);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let fakes = Fakes::new();
    let mut config = AppConfig::default();
    config.reels.replay_window = 0;

    let err = AppStores::new(fakes.remotes(), None, &config).err().unwrap();
    assert!(matches!(err, SyncError::Config(ref m) if m.contains("reels.replayWindow")));
}
