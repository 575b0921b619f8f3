use uuid::Uuid;

use rishta_types::models::UserId;

use crate::error::RemoteError;

/// Connection settings for the hosted data service, loaded from the
/// environment (`.env` honored if present).
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Opaque bearer token; authentication flows live outside this crate.
    pub token: Option<String>,
    pub user_id: UserId,
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self, RemoteError> {
        let _ = dotenvy::dotenv();

        let base_url = std::env::var("RISHTA_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let token = std::env::var("RISHTA_TOKEN").ok();
        let user_id: Uuid = std::env::var("RISHTA_USER_ID")
            .map_err(|_| RemoteError::Config("RISHTA_USER_ID is not set".to_string()))?
            .parse()
            .map_err(|_| RemoteError::Config("RISHTA_USER_ID is not a valid UUID".to_string()))?;

        Ok(Self {
            base_url,
            token,
            user_id,
        })
    }
}
