//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Persistence service base URL
    pub persistence_url: String,
    /// Persistence service key (server-side only)
    pub persistence_service_key: String,

    /// Reward service base URL
    pub reward_service_url: String,
    /// Reward service API key
    pub reward_service_key: String,

    /// JWT secret shared with the auth layer for token verification
    pub auth_jwt_secret: String,

    /// Public base URL for callbacks
    pub public_base_url: String,
    /// Allowed client origin for CORS
    pub client_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            persistence_url: env::var("PERSISTENCE_URL")
                .map_err(|_| ConfigError::Missing("PERSISTENCE_URL"))?,
            persistence_service_key: env::var("PERSISTENCE_SERVICE_KEY")
                .map_err(|_| ConfigError::Missing("PERSISTENCE_SERVICE_KEY"))?,

            reward_service_url: env::var("REWARD_SERVICE_URL")
                .map_err(|_| ConfigError::Missing("REWARD_SERVICE_URL"))?,
            reward_service_key: env::var("REWARD_SERVICE_KEY")
                .map_err(|_| ConfigError::Missing("REWARD_SERVICE_KEY"))?,

            auth_jwt_secret: env::var("AUTH_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("AUTH_JWT_SECRET"))?,

            public_base_url: env::var("PUBLIC_BASE_URL")
                .map_err(|_| ConfigError::Missing("PUBLIC_BASE_URL"))?,
            client_origin: env::var("CLIENT_ORIGIN")
                .map_err(|_| ConfigError::Missing("CLIENT_ORIGIN"))?,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
