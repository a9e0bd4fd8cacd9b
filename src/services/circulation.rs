//! Circulation service: the borrow/return state machine
//!
//! Each item moves between `Available` and `Borrowed`. A transition reads the
//! item's current state, validates it, appends the matching event to the
//! ledger and updates the availability index as one unit:
//!
//! - a per-item lock serializes transitions on the same item;
//! - the history lock is held in write mode while the event is appended and the
//!   index updated, and in read mode by queries, so readers only ever see
//!   committed states and the in-memory history keeps ledger order;
//! - the index changes only after the append succeeds, and the append runs on
//!   its own task, so dropping the caller's future cannot leave the two apart.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    error::{AppError, AppResult, ValidationError},
    models::{Book, HistoryEvent, Holding, ItemId, User, UserId},
    repository::Repository,
};

use super::availability::{AvailabilityIndex, ItemState};
use super::clock::Clock;

/// Loan period applied to every borrow
pub const DEFAULT_LOAN_PERIOD_DAYS: i64 = 14;

/// Longest loan period the configuration accepts
pub const MAX_LOAN_PERIOD_DAYS: i64 = 3650;

pub struct CirculationService {
    pub(super) repository: Repository,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) index: Arc<AvailabilityIndex>,
    pub(super) history: Arc<RwLock<Vec<HistoryEvent>>>,
    loan_period: Duration,
    item_locks: parking_lot::Mutex<HashMap<ItemId, Arc<Mutex<()>>>>,
}

impl CirculationService {
    /// Load the ledger and rebuild the availability index from it
    pub async fn open(
        repository: Repository,
        clock: Arc<dyn Clock>,
        loan_period: Duration,
    ) -> AppResult<Self> {
        let history = repository.ledger.load_history().await?;
        let index = AvailabilityIndex::rebuild(&history)?;

        for item_id in index.item_ids() {
            if !repository.items.item_exists(item_id) {
                tracing::warn!("Borrow history references book {} missing from the catalog", item_id);
            }
        }

        tracing::info!(
            "Circulation state rebuilt: {} events, {} books on loan",
            history.len(),
            index.borrowed_count()
        );

        Ok(Self {
            repository,
            clock,
            index: Arc::new(index),
            history: Arc::new(RwLock::new(history)),
            loan_period,
            item_locks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Borrow an item for a user.
    ///
    /// Returns `Ok(false)` without changing anything when the item is already
    /// borrowed; unknown users or items are `NotFound` errors.
    pub async fn borrow_book(&self, user_id: UserId, item_id: ItemId) -> AppResult<bool> {
        let user = self.find_user(user_id)?;
        let book = self.find_book(item_id)?;

        let guard = self.item_lock(item_id).lock_owned().await;

        let previous = self.index.state(item_id);
        if previous.and_then(|s| s.holding).is_some() {
            tracing::info!("Book {} is already borrowed", book.title);
            return Ok(false);
        }

        let now = self.event_time(previous);
        let due_at = now + self.loan_period;
        let next = ItemState {
            holding: Some(Holding {
                borrowed_by: user_id,
                due_at,
            }),
            last_event_at: now,
        };

        self.commit(HistoryEvent::borrow(user_id, item_id, now, due_at), next, guard)
            .await?;

        tracing::info!("User {} borrowed book {}", user.username, book.title);
        Ok(true)
    }

    /// Return an item held by a user
    pub async fn return_book(&self, user_id: UserId, item_id: ItemId) -> AppResult<()> {
        let book = self.find_book(item_id)?;

        let guard = self.item_lock(item_id).lock_owned().await;

        let previous = self.index.state(item_id);
        let holding = match previous.and_then(|s| s.holding) {
            None => {
                tracing::info!("Book {} is not currently borrowed", book.title);
                return Err(ValidationError::NotCurrentlyBorrowed { item_id }.into());
            }
            Some(h) if h.borrowed_by != user_id => {
                tracing::info!(
                    "User {} cannot return book {} they did not borrow",
                    user_id,
                    book.title
                );
                return Err(ValidationError::NotHolder { item_id, user_id }.into());
            }
            Some(h) => h,
        };

        let now = self.event_time(previous);
        let is_overdue = holding.is_overdue_at(now);
        let next = ItemState {
            holding: None,
            last_event_at: now,
        };

        self.commit(
            HistoryEvent::returned(user_id, item_id, now, is_overdue),
            next,
            guard,
        )
        .await?;

        tracing::info!(
            "User {} returned book {}. Overdue: {}",
            user_id,
            book.title,
            is_overdue
        );
        Ok(())
    }

    /// Append the event, then apply the transition and record it in history.
    ///
    /// Runs to completion on a separate task holding the item lock, even if
    /// the caller stops waiting.
    async fn commit(
        &self,
        event: HistoryEvent,
        next: ItemState,
        item_guard: OwnedMutexGuard<()>,
    ) -> AppResult<()> {
        let ledger = self.repository.ledger.clone();
        let index = self.index.clone();
        let history = self.history.clone();

        let task = tokio::spawn(async move {
            let _item_guard = item_guard;
            let mut history = history.write_owned().await;

            if let Err(e) = ledger.append(&event).await {
                tracing::error!(
                    "Failed to record {:?} of book {} by user {}: {}",
                    event.action,
                    event.item_id,
                    event.user_id,
                    e
                );
                return Err(AppError::from(e));
            }

            index.apply(event.item_id, next);
            history.push(event);
            Ok(())
        });

        task.await
            .map_err(|e| AppError::Internal(format!("Circulation commit task failed: {}", e)))?
    }

    /// Current time, never earlier than the item's previous event
    fn event_time(&self, previous: Option<ItemState>) -> DateTime<Utc> {
        let now = self.clock.now();
        previous.map_or(now, |s| now.max(s.last_event_at))
    }

    fn item_lock(&self, item_id: ItemId) -> Arc<Mutex<()>> {
        self.item_locks.lock().entry(item_id).or_default().clone()
    }

    fn find_user(&self, user_id: UserId) -> AppResult<User> {
        self.repository.users.lookup(user_id).ok_or_else(|| {
            tracing::info!("User with id: {} is not found", user_id);
            AppError::NotFound("User not found".to_string())
        })
    }

    fn find_book(&self, item_id: ItemId) -> AppResult<Book> {
        self.repository.items.lookup(item_id).ok_or_else(|| {
            tracing::info!("Book with id: {} is not found", item_id);
            AppError::NotFound("Book not found".to_string())
        })
    }
}
