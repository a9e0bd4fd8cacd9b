//! Item availability index
//!
//! In-memory view of which items are currently borrowed, derived entirely from
//! the ledger. Only the circulation service mutates it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    models::{BorrowAction, HistoryEvent, Holding, ItemId, UserId},
    repository::LedgerError,
};

/// Circulation state of one item that has appeared in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemState {
    pub holding: Option<Holding>,
    pub last_event_at: DateTime<Utc>,
}

impl ItemState {
    /// Apply one event, enforcing the borrow/return alternation
    fn fold(state: Option<ItemState>, event: &HistoryEvent) -> Result<ItemState, String> {
        if let Some(prev) = state {
            if event.timestamp < prev.last_event_at {
                return Err(format!(
                    "event for item {} at {} precedes the previous event at {}",
                    event.item_id, event.timestamp, prev.last_event_at
                ));
            }
        }

        let current = state.and_then(|s| s.holding);
        let holding = match (event.action, current) {
            (BorrowAction::Borrow, None) => {
                let due_at = event.due_at.ok_or_else(|| {
                    format!("borrow of item {} has no due date", event.item_id)
                })?;
                Some(Holding {
                    borrowed_by: event.user_id,
                    due_at,
                })
            }
            (BorrowAction::Borrow, Some(h)) => {
                return Err(format!(
                    "item {} borrowed by user {} while held by user {}",
                    event.item_id, event.user_id, h.borrowed_by
                ))
            }
            (BorrowAction::Return, Some(h)) if h.borrowed_by == event.user_id => None,
            (BorrowAction::Return, Some(h)) => {
                return Err(format!(
                    "item {} returned by user {} while held by user {}",
                    event.item_id, event.user_id, h.borrowed_by
                ))
            }
            (BorrowAction::Return, None) => {
                return Err(format!(
                    "item {} returned by user {} without being borrowed",
                    event.item_id, event.user_id
                ))
            }
        };

        Ok(ItemState {
            holding,
            last_event_at: event.timestamp,
        })
    }
}

/// Fold a sequence of events into per-item state
pub fn fold_events<'a>(
    events: impl IntoIterator<Item = &'a HistoryEvent>,
) -> Result<HashMap<ItemId, ItemState>, LedgerError> {
    let mut states: HashMap<ItemId, ItemState> = HashMap::new();
    for event in events {
        let next = ItemState::fold(states.get(&event.item_id).copied(), event)
            .map_err(LedgerError::Corrupt)?;
        states.insert(event.item_id, next);
    }
    Ok(states)
}

#[derive(Debug, Default)]
pub struct AvailabilityIndex {
    items: RwLock<HashMap<ItemId, ItemState>>,
}

impl AvailabilityIndex {
    /// Rebuild the index from the full ledger history
    pub fn rebuild(events: &[HistoryEvent]) -> Result<Self, LedgerError> {
        Ok(Self {
            items: RwLock::new(fold_events(events)?),
        })
    }

    pub fn state(&self, item_id: ItemId) -> Option<ItemState> {
        self.items.read().get(&item_id).copied()
    }

    pub fn holding(&self, item_id: ItemId) -> Option<Holding> {
        self.state(item_id).and_then(|s| s.holding)
    }

    pub fn is_borrowed(&self, item_id: ItemId) -> bool {
        self.holding(item_id).is_some()
    }

    pub fn last_event_at(&self, item_id: ItemId) -> Option<DateTime<Utc>> {
        self.state(item_id).map(|s| s.last_event_at)
    }

    /// Items currently held by a user, ordered by item id
    pub fn held_by(&self, user_id: UserId) -> Vec<(ItemId, Holding)> {
        self.borrowed_where(|h| h.borrowed_by == user_id)
    }

    /// Items whose due date is before `now`, ordered by item id
    pub fn overdue_at(&self, now: DateTime<Utc>) -> Vec<(ItemId, Holding)> {
        self.borrowed_where(|h| h.is_overdue_at(now))
    }

    /// Number of items currently borrowed
    pub fn borrowed_count(&self) -> usize {
        self.items.read().values().filter(|s| s.holding.is_some()).count()
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.read().keys().copied().collect();
        ids.sort();
        ids
    }

    fn borrowed_where(&self, predicate: impl Fn(&Holding) -> bool) -> Vec<(ItemId, Holding)> {
        let mut found: Vec<(ItemId, Holding)> = self
            .items
            .read()
            .iter()
            .filter_map(|(id, s)| s.holding.filter(|h| predicate(h)).map(|h| (*id, h)))
            .collect();
        found.sort_by_key(|(id, _)| *id);
        found
    }

    /// Record an item's state after its event has been stored
    pub(crate) fn apply(&self, item_id: ItemId, state: ItemState) {
        self.items.write().insert(item_id, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_rebuild_tracks_current_holder() {
        let events = vec![
            HistoryEvent::borrow(UserId(1), ItemId(1), t(1), t(15)),
            HistoryEvent::returned(UserId(1), ItemId(1), t(3), false),
            HistoryEvent::borrow(UserId(2), ItemId(1), t(4), t(18)),
            HistoryEvent::borrow(UserId(2), ItemId(2), t(4), t(18)),
        ];

        let index = AvailabilityIndex::rebuild(&events).unwrap();
        assert_eq!(
            index.holding(ItemId(1)),
            Some(Holding {
                borrowed_by: UserId(2),
                due_at: t(18)
            })
        );
        assert_eq!(index.held_by(UserId(2)).len(), 2);
        assert!(index.held_by(UserId(1)).is_empty());
        assert!(!index.is_borrowed(ItemId(3)));
        assert_eq!(index.last_event_at(ItemId(1)), Some(t(4)));
    }

    #[test]
    fn test_rebuild_rejects_return_without_borrow() {
        let events = vec![HistoryEvent::returned(UserId(1), ItemId(1), t(1), false)];
        assert!(matches!(
            AvailabilityIndex::rebuild(&events),
            Err(LedgerError::Corrupt(_))
        ));
    }

    #[test]
    fn test_rebuild_rejects_double_borrow() {
        let events = vec![
            HistoryEvent::borrow(UserId(1), ItemId(1), t(1), t(15)),
            HistoryEvent::borrow(UserId(2), ItemId(1), t(2), t(16)),
        ];
        assert!(AvailabilityIndex::rebuild(&events).is_err());
    }

    #[test]
    fn test_rebuild_rejects_return_by_other_user() {
        let events = vec![
            HistoryEvent::borrow(UserId(1), ItemId(1), t(1), t(15)),
            HistoryEvent::returned(UserId(2), ItemId(1), t(2), false),
        ];
        assert!(AvailabilityIndex::rebuild(&events).is_err());
    }

    #[test]
    fn test_rebuild_rejects_time_going_backwards() {
        let events = vec![
            HistoryEvent::borrow(UserId(1), ItemId(1), t(5), t(19)),
            HistoryEvent::returned(UserId(1), ItemId(1), t(2), false),
        ];
        assert!(AvailabilityIndex::rebuild(&events).is_err());
    }

    #[test]
    fn test_overdue_at_is_strictly_after_due_date() {
        let events = vec![HistoryEvent::borrow(UserId(1), ItemId(1), t(1), t(15))];
        let index = AvailabilityIndex::rebuild(&events).unwrap();

        assert!(index.overdue_at(t(15)).is_empty());
        assert_eq!(
            index.overdue_at(t(15) + Duration::seconds(1))
                .into_iter()
                .map(|(id, _)| id)
                .collect::<Vec<_>>(),
            vec![ItemId(1)]
        );
    }

    #[test]
    fn test_apply_replaces_item_state() {
        let index = AvailabilityIndex::default();
        index.apply(
            ItemId(9),
            ItemState {
                holding: Some(Holding {
                    borrowed_by: UserId(1),
                    due_at: t(15),
                }),
                last_event_at: t(1),
            },
        );
        assert!(index.is_borrowed(ItemId(9)));

        index.apply(
            ItemId(9),
            ItemState {
                holding: None,
                last_event_at: t(2),
            },
        );
        assert!(!index.is_borrowed(ItemId(9)));
        assert_eq!(index.last_event_at(ItemId(9)), Some(t(2)));
        assert_eq!(index.borrowed_count(), 0);
    }
}
