//! Repository layer: the borrow/return ledger and the lookup collaborators

pub mod items;
pub mod ledger;
pub mod users;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    error::AppResult,
    models::{Book, ItemId, User, UserId},
};

pub use ledger::{FileLedger, LedgerError, LedgerStore, MemoryLedger};

/// Catalog lookups consumed by the circulation engine
#[cfg_attr(test, mockall::automock)]
pub trait ItemCatalog: Send + Sync {
    fn lookup(&self, id: ItemId) -> Option<Book>;

    fn item_exists(&self, id: ItemId) -> bool {
        self.lookup(id).is_some()
    }
}

/// User directory lookups consumed by the circulation engine
#[cfg_attr(test, mockall::automock)]
pub trait UserDirectory: Send + Sync {
    fn lookup(&self, id: UserId) -> Option<User>;

    fn user_exists(&self, id: UserId) -> bool {
        self.lookup(id).is_some()
    }
}

/// Main repository struct holding the ledger and the collaborators
#[derive(Clone)]
pub struct Repository {
    pub items: Arc<dyn ItemCatalog>,
    pub users: Arc<dyn UserDirectory>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl Repository {
    pub fn new(
        items: Arc<dyn ItemCatalog>,
        users: Arc<dyn UserDirectory>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            items,
            users,
            ledger,
        }
    }

    /// Open the file-backed catalog, user directory and ledger named in the configuration
    pub async fn open(config: &AppConfig) -> AppResult<Self> {
        let items = items::ItemsRepository::load(&config.catalog.books_path).await?;
        let users = users::UsersRepository::load(&config.catalog.users_path).await?;
        let ledger = FileLedger::open(&config.ledger.path).await?;

        Ok(Self::new(Arc::new(items), Arc::new(users), Arc::new(ledger)))
    }
}
