//! Item (catalog entry) model and its circulation state

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use super::user::UserId;

/// Item identifier from the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ItemId(pub i32);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Catalog record for a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: ItemId,
    pub title: String,
    pub author: String,
    pub genre: String,
    pub published_year: i32,
    #[schema(value_type = String)]
    pub price: Decimal,
}

/// Who holds a borrowed item and until when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holding {
    pub borrowed_by: UserId,
    pub due_at: DateTime<Utc>,
}

impl Holding {
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        now > self.due_at
    }
}

/// Book with its current circulation state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(flatten)]
    pub book: Book,
    pub is_borrowed: bool,
    pub borrowed_by: Option<UserId>,
    pub due_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(book: Book, holding: Option<Holding>) -> Self {
        Self {
            book,
            is_borrowed: holding.is_some(),
            borrowed_by: holding.map(|h| h.borrowed_by),
            due_at: holding.map(|h| h.due_at),
        }
    }

    pub fn id(&self) -> ItemId {
        self.book.id
    }
}
