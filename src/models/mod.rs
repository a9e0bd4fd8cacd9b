//! Data models for the circulation server

pub mod history;
pub mod item;
pub mod user;

// Re-export commonly used types
pub use history::{BorrowAction, HistoryEvent};
pub use item::{Book, Holding, Item, ItemId};
pub use user::{Role, User, UserClaims, UserId};
