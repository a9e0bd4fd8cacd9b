//! Items repository: the book catalog, loaded once from a JSON file

use std::collections::HashMap;
use std::path::Path;

use crate::{
    error::{AppError, AppResult},
    models::{Book, ItemId},
};

use super::ItemCatalog;

#[derive(Debug, Clone, Default)]
pub struct ItemsRepository {
    books: HashMap<ItemId, Book>,
}

impl ItemsRepository {
    pub fn from_books(books: impl IntoIterator<Item = Book>) -> Self {
        Self {
            books: books.into_iter().map(|b| (b.id, b)).collect(),
        }
    }

    /// Load the catalog from a JSON array of books. The file must exist.
    pub async fn load(path: &Path) -> AppResult<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::Internal(format!("Book file not found at path {}: {}", path.display(), e))
        })?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::warn!("Book file {} is empty", path.display());
            return Ok(Self::default());
        }

        let books: Vec<Book> = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Internal(format!("Invalid book file {}: {}", path.display(), e))
        })?;

        tracing::info!("Book catalog loaded ({} books)", books.len());
        Ok(Self::from_books(books))
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl ItemCatalog for ItemsRepository {
    fn lookup(&self, id: ItemId) -> Option<Book> {
        self.books.get(&id).cloned()
    }

    fn item_exists(&self, id: ItemId) -> bool {
        self.books.contains_key(&id)
    }
}
