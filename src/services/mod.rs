//! Business logic services

pub mod availability;
pub mod circulation;
pub mod clock;
pub mod queries;

use std::sync::Arc;

use crate::{
    config::CirculationConfig,
    error::{AppError, AppResult},
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub circulation: Arc<circulation::CirculationService>,
}

impl Services {
    /// Create all services with the given repository, rebuilding circulation state from the ledger
    pub async fn new(
        repository: Repository,
        circulation_config: &CirculationConfig,
        clock: Arc<dyn clock::Clock>,
    ) -> AppResult<Self> {
        let loan_period = circulation_config
            .loan_period()
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(Self {
            circulation: Arc::new(
                circulation::CirculationService::open(repository, clock, loan_period).await?,
            ),
        })
    }
}
