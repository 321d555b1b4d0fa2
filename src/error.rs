// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error kinds surfaced by the coordinator and its collaborators.
//!
//! Identity and session errors reach the caller. Profile-sync and telemetry
//! errors are logged where they occur and never propagate.

use std::fmt;

/// Errors returned from coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Bad or duplicate credentials, weak secret, disabled account, network
    /// failure during a credential exchange. Carries the provider's message.
    #[error("{message}")]
    Credential {
        code: ProviderErrorCode,
        message: String,
    },

    /// Session transition (logout) failed at the provider.
    #[error("Session error: {0}")]
    Session(String),

    /// Principal-scoped operation attempted with no active principal.
    #[error("No user logged in")]
    NotAuthenticated,
}

impl AuthError {
    /// Map a provider failure during a session transition.
    pub fn session(err: ProviderError) -> Self {
        AuthError::Session(err.message)
    }

    /// Provider error code for credential failures.
    pub fn code(&self) -> Option<&ProviderErrorCode> {
        match self {
            AuthError::Credential { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        AuthError::Credential {
            code: err.code,
            message: err.message,
        }
    }
}

/// Result type alias for coordinator operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Failure categories reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderErrorCode {
    EmailExists,
    WeakPassword,
    InvalidEmail,
    InvalidCredential,
    UserDisabled,
    UserNotFound,
    TooManyRequests,
    InvalidActionCode,
    RequiresRecentLogin,
    CredentialAlreadyLinked,
    NoSuchProvider,
    NoCurrentUser,
    Network,
    Other(String),
}

impl ProviderErrorCode {
    /// Parse an identity platform REST error message such as
    /// `"WEAK_PASSWORD : Password should be at least 6 characters"`.
    pub fn from_identity_toolkit(message: &str) -> Self {
        let code = message.split(':').next().unwrap_or_default().trim();
        match code {
            "EMAIL_EXISTS" => Self::EmailExists,
            "WEAK_PASSWORD" => Self::WeakPassword,
            "INVALID_EMAIL" | "MISSING_EMAIL" => Self::InvalidEmail,
            "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "EMAIL_NOT_FOUND"
            | "MISSING_PASSWORD" | "INVALID_IDP_RESPONSE" => Self::InvalidCredential,
            "USER_DISABLED" => Self::UserDisabled,
            "USER_NOT_FOUND" => Self::UserNotFound,
            "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyRequests,
            "INVALID_OOB_CODE" | "EXPIRED_OOB_CODE" => Self::InvalidActionCode,
            "CREDENTIAL_TOO_OLD_LOGIN_AGAIN" | "TOKEN_EXPIRED" | "INVALID_ID_TOKEN"
            | "INVALID_REFRESH_TOKEN" => Self::RequiresRecentLogin,
            "FEDERATED_USER_ID_ALREADY_LINKED" => Self::CredentialAlreadyLinked,
            "NO_SUCH_PROVIDER" => Self::NoSuchProvider,
            other => Self::Other(other.to_string()),
        }
    }

    /// Human-readable default message for the code.
    pub fn describe(&self) -> &str {
        match self {
            Self::EmailExists => "The email address is already in use by another account.",
            Self::WeakPassword => "Password should be at least 6 characters.",
            Self::InvalidEmail => "The email address is badly formatted.",
            Self::InvalidCredential => "The email or password is incorrect.",
            Self::UserDisabled => "This account has been disabled.",
            Self::UserNotFound => "There is no account for this identifier.",
            Self::TooManyRequests => "Too many attempts. Try again later.",
            Self::InvalidActionCode => "The action code is invalid or has expired.",
            Self::RequiresRecentLogin => "This operation requires a recent login.",
            Self::CredentialAlreadyLinked => {
                "This credential is already associated with a different account."
            }
            Self::NoSuchProvider => "The account is not linked to this provider.",
            Self::NoCurrentUser => "No user is signed in with the identity provider.",
            Self::Network => "A network error occurred.",
            Self::Other(code) => code.as_str(),
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "{}", code),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Error reported by an identity provider call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error with the code's default message.
    pub fn from_code(code: ProviderErrorCode) -> Self {
        let message = code.describe().to_string();
        Self { code, message }
    }

    pub fn network(err: impl fmt::Display) -> Self {
        Self::new(
            ProviderErrorCode::Network,
            format!("A network error occurred: {}", err),
        )
    }
}

/// Errors from a profile store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Profile already exists: {0}")]
    AlreadyExists(String),

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Operation not supported by this store: {0}")]
    Unsupported(&'static str),
}

/// Profile reconciliation failure. Logged, never surfaced to callers.
#[derive(Debug, thiserror::Error)]
#[error("Profile sync failed for {uid}: {source}")]
pub struct ProfileSyncError {
    pub uid: String,
    #[source]
    pub source: StoreError,
}

/// Metrics sink failure. Logged and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Metrics sink error: {0}")]
    Sink(String),
}
