//! Users repository: the user directory, loaded once from a JSON file

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;

use crate::{
    error::{AppError, AppResult},
    models::{User, UserId},
};

use super::UserDirectory;

#[derive(Debug, Clone, Default)]
pub struct UsersRepository {
    users: HashMap<UserId, User>,
}

impl UsersRepository {
    pub fn from_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    /// Load the directory from a JSON array of users. A missing file yields an empty directory.
    pub async fn load(path: &Path) -> AppResult<Self> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!("User file not found at path: {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AppError::Internal(format!(
                    "Failed to read user file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            tracing::warn!("User file {} is empty", path.display());
            return Ok(Self::default());
        }

        let users: Vec<User> = serde_json::from_slice(&bytes).map_err(|e| {
            AppError::Internal(format!("Invalid user file {}: {}", path.display(), e))
        })?;

        tracing::info!("Users loaded successfully ({} users)", users.len());
        Ok(Self::from_users(users))
    }
}

impl UserDirectory for UsersRepository {
    fn lookup(&self, id: UserId) -> Option<User> {
        self.users.get(&id).cloned()
    }

    fn user_exists(&self, id: UserId) -> bool {
        self.users.contains_key(&id)
    }
}
