//! Read-only circulation queries

use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    error::{AppError, AppResult},
    models::{HistoryEvent, Holding, Item, ItemId, UserId},
};

use super::availability::ItemState;
use super::circulation::CirculationService;

/// Point-in-time circulation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CirculationSummary {
    pub events: usize,
    pub borrowed: usize,
    pub overdue: usize,
}

impl CirculationService {
    /// Committed state of an item, `None` if it never circulated
    pub async fn item_state(&self, item_id: ItemId) -> Option<ItemState> {
        let _history = self.history.read().await;
        self.index.state(item_id)
    }

    /// Current holder and due date of an item, if it is on loan
    pub async fn holding(&self, item_id: ItemId) -> Option<Holding> {
        let _history = self.history.read().await;
        self.index.holding(item_id)
    }

    /// All events for a book, in append order
    pub async fn book_history(&self, item_id: ItemId) -> Vec<HistoryEvent> {
        tracing::debug!("Fetching history for book ID: {}", item_id);
        let history = self.history.read().await;
        history
            .iter()
            .filter(|e| e.item_id == item_id)
            .cloned()
            .collect()
    }

    /// All events for a user, in append order
    pub async fn user_history(&self, user_id: UserId) -> AppResult<Vec<HistoryEvent>> {
        if !self.repository.users.user_exists(user_id) {
            tracing::warn!("User with ID {} not found when fetching history", user_id);
            return Err(AppError::NotFound("User not found".to_string()));
        }

        tracing::debug!("Fetching history for user ID: {}", user_id);
        let history = self.history.read().await;
        Ok(history
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    /// Books currently held by a user
    pub async fn borrowed_books_by_user(&self, user_id: UserId) -> AppResult<Vec<Item>> {
        if !self.repository.users.user_exists(user_id) {
            tracing::warn!(
                "User with ID {} not found when fetching borrowed books",
                user_id
            );
            return Err(AppError::NotFound("User not found".to_string()));
        }

        tracing::debug!("Fetching borrowed books for user ID: {}", user_id);
        let _history = self.history.read().await;
        Ok(self.to_items(self.index.held_by(user_id)))
    }

    /// Borrowed books whose due date has passed
    pub async fn overdue_books(&self) -> Vec<Item> {
        let _history = self.history.read().await;
        let now = self.clock.now();
        self.to_items(self.index.overdue_at(now))
    }

    pub async fn summary(&self) -> CirculationSummary {
        let history = self.history.read().await;
        CirculationSummary {
            events: history.len(),
            borrowed: self.index.borrowed_count(),
            overdue: self.index.overdue_at(self.clock.now()).len(),
        }
    }

    fn to_items(&self, holdings: Vec<(ItemId, Holding)>) -> Vec<Item> {
        holdings
            .into_iter()
            .filter_map(|(item_id, holding)| match self.repository.items.lookup(item_id) {
                Some(book) => Some(Item::new(book, Some(holding))),
                None => {
                    tracing::warn!("Borrowed book {} is missing from the catalog", item_id);
                    None
                }
            })
            .collect()
    }
}
