//! AppStores: the composition root owning one store per domain.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::domain::{Cart, CartStore, Chat, ChatStore, Reels, ReelsStore, Wallet, WalletStore};
use crate::error::Result;
use crate::storage::PersistenceBackend;
use crate::sync::{RefreshReport, RemoteCall};

/// One remote authority per domain.
pub struct Remotes {
    pub cart: Arc<dyn RemoteCall<Cart>>,
    pub wallet: Arc<dyn RemoteCall<Wallet>>,
    pub reels: Arc<dyn RemoteCall<Reels>>,
    pub chat: Arc<dyn RemoteCall<Chat>>,
}

/// Outcome of [`AppStores::refresh_all`], one entry per store.
#[derive(Debug)]
pub struct RefreshAll {
    pub cart: Result<RefreshReport>,
    pub wallet: Result<RefreshReport>,
    pub reels: Result<RefreshReport>,
    pub chat: Result<RefreshReport>,
}

pub struct AppStores {
    pub cart: CartStore,
    pub wallet: WalletStore,
    pub reels: ReelsStore,
    pub chat: ChatStore,
}

impl AppStores {
    /// Build every store. Stores with a `persist_key` restore their state
    /// from `persistence` before this returns.
    pub fn new(
        remotes: Remotes,
        persistence: Option<Arc<dyn PersistenceBackend>>,
        config: &AppConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cart: CartStore::new(remotes.cart, config.cart.clone(), persistence.clone()),
            wallet: WalletStore::new(remotes.wallet, config.wallet.clone(), persistence.clone()),
            reels: ReelsStore::new(remotes.reels, config.reels.clone(), persistence.clone()),
            chat: ChatStore::new(remotes.chat, config.chat.clone(), persistence),
        })
    }

    /// Re-synchronize every store with its remote authority. Stores refresh
    /// concurrently; one failing does not stop the others.
    pub async fn refresh_all(&self) -> RefreshAll {
        let (cart, wallet, reels, chat) = tokio::join!(
            self.cart.refresh(),
            self.wallet.refresh(),
            self.reels.refresh(),
            self.chat.refresh(),
        );
        for (store, result) in [
            ("cart", &cart),
            ("wallet", &wallet),
            ("reels", &reels),
            ("chat", &chat),
        ] {
            if let Err(e) = result {
                tracing::warn!(store, error = %e, "background refresh failed");
            }
        }
        RefreshAll {
            cart,
            wallet,
            reels,
            chat,
        }
    }
}
