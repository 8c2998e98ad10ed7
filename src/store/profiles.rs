//! Pilot profile lookup (display names on connect)

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::client::{PersistenceClient, StoreError};

/// Pilot profile row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilotProfile {
    pub id: Uuid,
    pub callsign: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// New profile for insertion
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub id: Uuid,
    pub callsign: String,
}

/// Profile store operations
#[derive(Clone)]
pub struct PilotProfileStore {
    client: PersistenceClient,
}

impl PilotProfileStore {
    pub fn new(client: PersistenceClient) -> Self {
        Self { client }
    }

    /// Get a pilot profile by account id
    pub async fn get_profile(&self, account: Uuid) -> Result<Option<PilotProfile>, StoreError> {
        let query = format!("id=eq.{}", account);
        self.client.get_one("pilot_profiles", &query).await
    }

    /// Create a new pilot profile
    pub async fn create_profile(
        &self,
        account: Uuid,
        callsign: &str,
    ) -> Result<PilotProfile, StoreError> {
        let profile = NewProfile {
            id: account,
            callsign: callsign.to_string(),
        };
        self.client.insert("pilot_profiles", &profile).await
    }

    /// Get or create profile (ensures a callsign exists)
    pub async fn ensure_profile(
        &self,
        account: Uuid,
        default_callsign: &str,
    ) -> Result<PilotProfile, StoreError> {
        match self.get_profile(account).await? {
            Some(profile) => Ok(profile),
            None => self.create_profile(account, default_callsign).await,
        }
    }
}
