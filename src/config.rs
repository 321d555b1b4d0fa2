// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

use crate::db::collections;
use crate::services::identity_toolkit::{IDENTITY_TOOLKIT_URL, SECURE_TOKEN_URL};
use crate::services::profile_sync::SyncStrategy;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Identity platform ---
    /// Web API key for the identity platform (public)
    pub api_key: String,
    /// GCP / Firebase project ID
    pub project_id: String,
    /// Base URL of the `accounts:*` endpoints
    pub identity_toolkit_url: String,
    /// Base URL of the token refresh endpoint
    pub secure_token_url: String,
    /// Where a remembered session is kept between runs
    pub session_file: Option<PathBuf>,

    // --- Profile store ---
    pub profile_collection: String,
    pub sync_strategy: SyncStrategy,

    // --- Analytics (disabled unless both are set) ---
    pub ga_measurement_id: Option<String>,
    pub ga_api_secret: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            api_key: env::var("FIREBASE_API_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FIREBASE_API_KEY"))?,
            project_id: env::var("FIREBASE_PROJECT_ID")
                .map_err(|_| ConfigError::Missing("FIREBASE_PROJECT_ID"))?,
            identity_toolkit_url: optional("IDENTITY_TOOLKIT_URL")
                .unwrap_or_else(|| IDENTITY_TOOLKIT_URL.to_string()),
            secure_token_url: optional("SECURE_TOKEN_URL")
                .unwrap_or_else(|| SECURE_TOKEN_URL.to_string()),
            session_file: optional("SESSION_FILE").map(PathBuf::from),
            profile_collection: optional("PROFILE_COLLECTION")
                .unwrap_or_else(|| collections::USERS.to_string()),
            sync_strategy: match optional("PROFILE_SYNC_STRATEGY") {
                Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                    name: "PROFILE_SYNC_STRATEGY",
                    reason,
                })?,
                None => SyncStrategy::default(),
            },
            ga_measurement_id: optional("GA_MEASUREMENT_ID"),
            ga_api_secret: optional("GA_API_SECRET").map(|v| v.trim().to_string()),
        })
    }

    /// Offline configuration for tests.
    pub fn test_default() -> Self {
        Self {
            api_key: "test-api-key".to_string(),
            project_id: "test-project".to_string(),
            identity_toolkit_url: IDENTITY_TOOLKIT_URL.to_string(),
            secure_token_url: SECURE_TOKEN_URL.to_string(),
            session_file: None,
            profile_collection: collections::USERS.to_string(),
            sync_strategy: SyncStrategy::default(),
            ga_measurement_id: None,
            ga_api_secret: None,
        }
    }

    /// Measurement id and API secret, if analytics is configured.
    pub fn analytics(&self) -> Option<(&str, &str)> {
        Some((
            self.ga_measurement_id.as_deref()?,
            self.ga_api_secret.as_deref()?,
        ))
    }
}

/// Unset and empty variables are treated the same.
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("FIREBASE_API_KEY", " test_key ");
        env::set_var("FIREBASE_PROJECT_ID", "test-project");
        env::set_var("PROFILE_SYNC_STRATEGY", "atomic");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.api_key, "test_key");
        assert_eq!(config.project_id, "test-project");
        assert_eq!(config.profile_collection, "users");
        assert_eq!(config.sync_strategy, SyncStrategy::Atomic);
        assert_eq!(config.identity_toolkit_url, IDENTITY_TOOLKIT_URL);
    }

    #[test]
    fn analytics_requires_both_values() {
        let mut config = Config::test_default();
        assert!(config.analytics().is_none());

        config.ga_measurement_id = Some("G-TEST".to_string());
        assert!(config.analytics().is_none());

        config.ga_api_secret = Some("secret".to_string());
        assert_eq!(config.analytics(), Some(("G-TEST", "secret")));
    }
}
