//! Shared server state handed to every command.

use std::sync::Arc;

use crate::config::GateConfig;
use crate::core::{AdmissionController, ProfileCache, SessionAccountant};
use crate::db::Database;
use crate::dispatch::CommandDispatcher;
use crate::error::GateError;

/// Shared server state. The SQLite database backs both the transport
/// directory and the session store.
pub struct GateState {
    pub controller: Arc<AdmissionController>,
    pub accountant: Arc<SessionAccountant>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub database: Arc<Database>,
}

impl GateState {
    pub fn new(database: Arc<Database>, config: &GateConfig) -> Result<Self, GateError> {
        let cache = Arc::new(ProfileCache::new(database.clone()));
        Ok(Self {
            controller: Arc::new(AdmissionController::new(cache)),
            accountant: Arc::new(SessionAccountant::new(database.clone())),
            dispatcher: Arc::new(CommandDispatcher::new(&config.dispatch)?),
            database,
        })
    }

    pub fn cache(&self) -> &Arc<ProfileCache> {
        self.controller.cache()
    }
}
