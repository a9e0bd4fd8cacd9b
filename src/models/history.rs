//! Borrow/return history events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{item::ItemId, user::UserId};

/// Circulation action recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum BorrowAction {
    Borrow,
    Return,
}

/// One ledger record. Immutable once appended.
///
/// `due_at` is only present on `Borrow` events and `is_overdue` only on
/// `Return` events; use [`HistoryEvent::borrow`] and [`HistoryEvent::returned`]
/// to build well-formed events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HistoryEvent {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub action: BorrowAction,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_overdue: Option<bool>,
}

impl HistoryEvent {
    pub fn borrow(
        user_id: UserId,
        item_id: ItemId,
        timestamp: DateTime<Utc>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            item_id,
            action: BorrowAction::Borrow,
            timestamp,
            due_at: Some(due_at),
            is_overdue: None,
        }
    }

    pub fn returned(
        user_id: UserId,
        item_id: ItemId,
        timestamp: DateTime<Utc>,
        is_overdue: bool,
    ) -> Self {
        Self {
            user_id,
            item_id,
            action: BorrowAction::Return,
            timestamp,
            due_at: None,
            is_overdue: Some(is_overdue),
        }
    }

    /// Check that the optional fields match the action
    pub fn check_shape(&self) -> Result<(), String> {
        match (self.action, self.due_at.is_some(), self.is_overdue.is_some()) {
            (BorrowAction::Borrow, true, false) | (BorrowAction::Return, false, true) => Ok(()),
            (BorrowAction::Borrow, _, _) => {
                Err("Borrow event requires dueAt and must not carry isOverdue".to_string())
            }
            (BorrowAction::Return, _, _) => {
                Err("Return event requires isOverdue and must not carry dueAt".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_borrow_serializes_without_overdue_flag() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let due = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let event = HistoryEvent::borrow(UserId(1), ItemId(7), at, due);

        let line = serde_json::to_string(&event).unwrap();
        assert_eq!(
            line,
            r#"{"userId":1,"itemId":7,"action":"Borrow","timestamp":"2026-01-01T10:00:00Z","dueAt":"2026-01-15T10:00:00Z"}"#
        );
    }

    #[test]
    fn test_return_serializes_without_due_date() {
        let at = Utc.with_ymd_and_hms(2026, 1, 16, 9, 0, 0).unwrap();
        let event = HistoryEvent::returned(UserId(1), ItemId(7), at, true);

        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains("dueAt"));
        assert!(line.contains(r#""isOverdue":true"#));
    }

    #[test]
    fn test_check_shape() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(HistoryEvent::borrow(UserId(1), ItemId(1), at, at).check_shape().is_ok());
        assert!(HistoryEvent::returned(UserId(1), ItemId(1), at, false).check_shape().is_ok());

        let mut broken = HistoryEvent::returned(UserId(1), ItemId(1), at, false);
        broken.due_at = Some(at);
        assert!(broken.check_shape().is_err());

        let mut broken = HistoryEvent::borrow(UserId(1), ItemId(1), at, at);
        broken.due_at = None;
        assert!(broken.check_shape().is_err());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let line = r#"{"userId":1,"itemId":7,"action":"Return","timestamp":"2026-01-01T10:00:00Z","isOverdue":false,"fine":3}"#;
        assert!(serde_json::from_str::<HistoryEvent>(line).is_err());
    }
}
