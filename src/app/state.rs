//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::{SessionRegistry, SessionServices};
use crate::lobby::SessionDirector;
use crate::rewards::RewardService;
use crate::store::{PersistenceClient, PilotProfileStore, RecordStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub profiles: PilotProfileStore,
    pub director: Arc<SessionDirector>,
    pub session_registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Persistence service clients
        let persistence = PersistenceClient::new(&config);
        let profiles = PilotProfileStore::new(persistence.clone());
        let records = RecordStore::new(persistence);

        // Reward service client
        let rewards = RewardService::new(&config);

        // Session registry and the director that routes players into it
        let session_registry = Arc::new(SessionRegistry::new());
        let services = SessionServices {
            rewards,
            records,
        };
        let director = Arc::new(SessionDirector::new(session_registry.clone(), services));

        Self {
            config,
            profiles,
            director,
            session_registry,
        }
    }
}
