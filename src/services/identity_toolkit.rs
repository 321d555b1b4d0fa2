// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! REST client for the hosted identity platform.
//!
//! Handles:
//! - Email/password and federated sign-in via `accounts:*` endpoints
//! - Account updates, verification and reset emails, provider linking
//! - ID token refresh when expiring (with 5-minute margin)
//! - Durable session storage for the `Local` persistence mode
//!
//! Every change to the signed-in account is published to subscribers.
//! `Session` persistence keeps tokens in memory only; `Local` additionally
//! writes them to the configured session file so [`IdentityToolkitProvider::restore`]
//! can pick the session back up after a restart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{ProviderError, ProviderErrorCode};
use crate::models::principal::PASSWORD_PROVIDER_ID;
use crate::models::{FederatedCredential, Principal, PrincipalChanges};
use crate::services::identity::{AuthStateNotifier, IdentityProvider, Persistence, Subscription};

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1";

/// Buffer before expiry at which we proactively refresh the ID token.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// `requestUri` sent with IdP sign-in; tokens are supplied directly, so no
/// redirect ever happens.
const IDP_REQUEST_URI: &str = "http://localhost";

/// Tokens for the signed-in principal.
///
/// `mode` is bound when the session is established and never changes for
/// its lifetime. Only `Local` sessions reach the session file, so a restored
/// session reads back as `Local`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSession {
    uid: String,
    id_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    #[serde(skip)]
    mode: Persistence,
}

impl StoredSession {
    fn from_tokens(tokens: AuthTokens, now: DateTime<Utc>, mode: Persistence) -> Self {
        Self {
            uid: tokens.local_id,
            id_token: tokens.id_token,
            refresh_token: tokens.refresh_token,
            expires_at: now + Duration::seconds(parse_expires_in(&tokens.expires_in)),
            mode,
        }
    }

    /// Same session with refreshed tokens; the bound mode carries over.
    fn refreshed(&self, response: RefreshResponse, now: DateTime<Utc>) -> Self {
        Self {
            uid: response.user_id,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
            expires_at: now + Duration::seconds(parse_expires_in(&response.expires_in)),
            mode: self.mode,
        }
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) >= self.expires_at
    }
}

fn parse_expires_in(value: &str) -> i64 {
    value.parse().unwrap_or(3600)
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthTokens {
    local_id: String,
    id_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: String,
}

/// Response of `accounts:update`; tokens are only re-issued when the
/// email or password changed.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateResponse {
    local_id: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

impl UpdateResponse {
    fn into_tokens(self) -> Option<AuthTokens> {
        Some(AuthTokens {
            local_id: self.local_id?,
            id_token: self.id_token?,
            refresh_token: self.refresh_token?,
            expires_in: self.expires_in.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderUserInfo {
    provider_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    display_name: Option<String>,
    photo_url: Option<String>,
    #[serde(default)]
    provider_user_info: Vec<ProviderUserInfo>,
    #[serde(default)]
    password_hash: Option<String>,
}

impl From<AccountInfo> for Principal {
    fn from(info: AccountInfo) -> Self {
        let mut provider_ids: Vec<String> = info
            .provider_user_info
            .into_iter()
            .map(|p| p.provider_id)
            .collect();
        if info.password_hash.is_some() && !provider_ids.iter().any(|p| p == PASSWORD_PROVIDER_ID)
        {
            provider_ids.push(PASSWORD_PROVIDER_ID.to_string());
        }
        Principal {
            uid: info.local_id,
            email: info.email,
            email_verified: info.email_verified,
            display_name: info.display_name,
            photo_url: info.photo_url,
            provider_ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────────────────

/// Identity provider backed by the identity platform REST API.
pub struct IdentityToolkitProvider {
    http: reqwest::Client,
    api_key: String,
    identity_url: String,
    token_url: String,
    session_file: Option<PathBuf>,
    /// Held across refreshes so only one refresh runs at a time.
    session: Mutex<Option<StoredSession>>,
    mode: parking_lot::Mutex<Persistence>,
    notifier: AuthStateNotifier,
}

impl IdentityToolkitProvider {
    /// Create a provider whose initial state is unresolved until
    /// [`Self::restore`] runs.
    pub fn new(api_key: String, session_file: Option<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            identity_url: IDENTITY_TOOLKIT_URL.to_string(),
            token_url: SECURE_TOKEN_URL.to_string(),
            session_file,
            session: Mutex::new(None),
            mode: parking_lot::Mutex::new(Persistence::Local),
            notifier: AuthStateNotifier::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_key.clone(), config.session_file.clone())
            .with_endpoints(config.identity_toolkit_url.clone(), config.secure_token_url.clone())
    }

    /// Point the provider at different endpoints (e.g. the auth emulator).
    pub fn with_endpoints(mut self, identity_url: String, token_url: String) -> Self {
        self.identity_url = identity_url.trim_end_matches('/').to_string();
        self.token_url = token_url.trim_end_matches('/').to_string();
        self
    }

    /// Load a durable session, if one was saved, and publish the initial
    /// identity state. A session that can no longer be refreshed is dropped.
    pub async fn restore(&self) {
        let principal = match self.restore_session().await {
            Ok(principal) => principal,
            Err(e) => {
                tracing::warn!(error = %e, "Saved session could not be restored");
                *self.session.lock().await = None;
                self.remove_session_file().await;
                None
            }
        };
        tracing::info!(signed_in = principal.is_some(), "Identity state restored");
        self.notifier.publish(principal);
    }

    async fn restore_session(&self) -> Result<Option<Principal>, ProviderError> {
        let Some(path) = &self.session_file else {
            return Ok(None);
        };
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ProviderError::new(
                    ProviderErrorCode::Other("SESSION_IO".into()),
                    e.to_string(),
                ))
            }
        };
        let stored: StoredSession = serde_json::from_slice(&data).map_err(|e| {
            ProviderError::new(
                ProviderErrorCode::Other("CORRUPT_SESSION".into()),
                e.to_string(),
            )
        })?;

        *self.session.lock().await = Some(stored);
        let token = self.id_token().await?;
        self.lookup(&token).await.map(Some)
    }

    // ─────────────────────────────────────────────────────────────────────
    // HTTP helpers
    // ─────────────────────────────────────────────────────────────────────

    async fn post_accounts<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/accounts:{}", self.identity_url, method);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(ProviderError::network)?;

        check_response_json(response).await
    }

    async fn refresh(&self, session: &StoredSession) -> Result<StoredSession, ProviderError> {
        let url = format!("{}/token", self.token_url);
        let response = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", session.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(ProviderError::network)?;

        let refreshed: RefreshResponse = check_response_json(response).await?;
        Ok(session.refreshed(refreshed, Utc::now()))
    }

    /// Valid ID token for the signed-in principal, refreshing if needed.
    async fn id_token(&self) -> Result<String, ProviderError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::NoCurrentUser))?;

        if !session.needs_refresh(Utc::now()) {
            return Ok(session.id_token.clone());
        }

        tracing::debug!(uid = %session.uid, "Refreshing ID token");
        let refreshed = self.refresh(session).await?;
        let token = refreshed.id_token.clone();
        *guard = Some(refreshed.clone());
        drop(guard);

        self.persist(&refreshed).await;
        Ok(token)
    }

    async fn lookup(&self, id_token: &str) -> Result<Principal, ProviderError> {
        let body = serde_json::json!({ "idToken": id_token });
        let response: LookupResponse = self.post_accounts("lookup", &body).await?;
        response
            .users
            .into_iter()
            .next()
            .map(Principal::from)
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::UserNotFound))
    }

    /// Install freshly issued tokens bound to `mode` and return the principal
    /// they belong to.
    async fn establish(
        &self,
        tokens: AuthTokens,
        mode: Persistence,
    ) -> Result<Principal, ProviderError> {
        let stored = StoredSession::from_tokens(tokens, Utc::now(), mode);
        let principal = self.lookup(&stored.id_token).await?;

        *self.session.lock().await = Some(stored.clone());
        self.persist(&stored).await;
        Ok(principal)
    }

    /// Sign in with issued tokens and notify subscribers. The mode selected
    /// before this exchange is bound to the new session.
    async fn sign_in(&self, tokens: AuthTokens) -> Result<Principal, ProviderError> {
        let mode = *self.mode.lock();
        let principal = self.establish(tokens, mode).await?;
        tracing::info!(uid = %principal.uid, "Signed in");
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn update_account(
        &self,
        mut body: serde_json::Value,
    ) -> Result<Principal, ProviderError> {
        let token = self.id_token().await?;
        body["idToken"] = serde_json::Value::String(token.clone());
        body["returnSecureToken"] = serde_json::Value::Bool(true);

        let response: UpdateResponse = self.post_accounts("update", &body).await?;
        let principal = match response.into_tokens() {
            Some(tokens) => self.establish(tokens, self.bound_mode().await).await?,
            None => self.lookup(&token).await?,
        };
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    /// Mode bound to the current session, or the pending mode if none.
    async fn bound_mode(&self) -> Persistence {
        match self.session.lock().await.as_ref() {
            Some(session) => session.mode,
            None => *self.mode.lock(),
        }
    }

    /// Write or clear the session file according to the session's bound mode.
    async fn persist(&self, session: &StoredSession) {
        let Some(path) = &self.session_file else {
            return;
        };
        if session.mode == Persistence::Session {
            self.remove_session_file().await;
            return;
        }

        let result = match serde_json::to_vec(session) {
            Ok(data) => tokio::fs::write(path, data).await,
            Err(e) => Err(std::io::Error::other(e)),
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to save session");
        }
    }

    async fn remove_session_file(&self) {
        let Some(path) = &self.session_file else {
            return;
        };
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove session file");
            }
        }
    }
}

/// Check response status and map the platform's error body if unsuccessful.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => map_error_message(&parsed.error.message),
            Err(_) => ProviderError::new(
                ProviderErrorCode::Other(format!("HTTP_{}", status.as_u16())),
                format!("HTTP {}: {}", status, body),
            ),
        });
    }

    response.json().await.map_err(|e| {
        ProviderError::new(
            ProviderErrorCode::Other("INVALID_RESPONSE".into()),
            e.to_string(),
        )
    })
}

/// Map an error message such as `"WEAK_PASSWORD : Password should be at
/// least 6 characters"` to a provider error, preferring the detail text.
fn map_error_message(message: &str) -> ProviderError {
    let code = ProviderErrorCode::from_identity_toolkit(message);
    match message.split_once(':') {
        Some((_, detail)) if !detail.trim().is_empty() => ProviderError::new(code, detail.trim()),
        _ => ProviderError::from_code(code),
    }
}

#[async_trait]
impl IdentityProvider for IdentityToolkitProvider {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ProviderError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });
        let tokens: AuthTokens = self.post_accounts("signUp", &body).await?;
        self.sign_in(tokens).await
    }

    async fn exchange_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ProviderError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });
        let tokens: AuthTokens = self.post_accounts("signInWithPassword", &body).await?;
        self.sign_in(tokens).await
    }

    async fn sign_in_federated(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Principal, ProviderError> {
        let body = serde_json::json!({
            "postBody": credential.post_body(),
            "requestUri": IDP_REQUEST_URI,
            "returnSecureToken": true,
            "returnIdpCredential": true,
        });
        let tokens: AuthTokens = self.post_accounts("signInWithIdp", &body).await?;
        self.sign_in(tokens).await
    }

    async fn end_session(&self) -> Result<(), ProviderError> {
        let previous = self.session.lock().await.take();
        self.remove_session_file().await;
        if let Some(session) = previous {
            tracing::info!(uid = %session.uid, "Signed out");
        }
        self.notifier.publish(None);
        Ok(())
    }

    async fn send_reset(&self, email: &str) -> Result<(), ProviderError> {
        let body = serde_json::json!({
            "requestType": "PASSWORD_RESET",
            "email": email,
        });
        let _: serde_json::Value = self.post_accounts("sendOobCode", &body).await?;
        Ok(())
    }

    async fn send_verification(&self) -> Result<(), ProviderError> {
        let token = self.id_token().await?;
        let body = serde_json::json!({
            "requestType": "VERIFY_EMAIL",
            "idToken": token,
        });
        let _: serde_json::Value = self.post_accounts("sendOobCode", &body).await?;
        Ok(())
    }

    async fn apply_verification_code(&self, code: &str) -> Result<(), ProviderError> {
        let body = serde_json::json!({ "oobCode": code });
        let _: serde_json::Value = self.post_accounts("update", &body).await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        changes: &PrincipalChanges,
    ) -> Result<Principal, ProviderError> {
        let mut body = serde_json::json!({});
        if let Some(name) = &changes.display_name {
            body["displayName"] = serde_json::Value::String(name.clone());
        }
        if let Some(url) = &changes.photo_url {
            body["photoUrl"] = serde_json::Value::String(url.clone());
        }
        self.update_account(body).await
    }

    async fn update_email(&self, email: &str) -> Result<Principal, ProviderError> {
        self.update_account(serde_json::json!({ "email": email }))
            .await
    }

    async fn update_password(&self, password: &str) -> Result<(), ProviderError> {
        self.update_account(serde_json::json!({ "password": password }))
            .await?;
        Ok(())
    }

    async fn reload(&self) -> Result<Option<Principal>, ProviderError> {
        if self.session.lock().await.is_none() {
            return Ok(None);
        }
        let token = self.id_token().await?;
        let principal = self.lookup(&token).await?;
        self.notifier.publish(Some(principal.clone()));
        Ok(Some(principal))
    }

    async fn link_provider(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Principal, ProviderError> {
        let token = self.id_token().await?;
        let body = serde_json::json!({
            "idToken": token,
            "postBody": credential.post_body(),
            "requestUri": IDP_REQUEST_URI,
            "returnSecureToken": true,
            "returnIdpCredential": true,
        });
        let tokens: AuthTokens = self.post_accounts("signInWithIdp", &body).await?;
        let principal = self.establish(tokens, self.bound_mode().await).await?;
        tracing::info!(uid = %principal.uid, provider = credential.kind.provider_id(), "Provider linked");
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn unlink_provider(&self, provider_id: &str) -> Result<Principal, ProviderError> {
        let principal = self
            .update_account(serde_json::json!({ "deleteProvider": [provider_id] }))
            .await?;
        tracing::info!(uid = %principal.uid, provider = provider_id, "Provider unlinked");
        Ok(principal)
    }

    async fn set_persistence_mode(&self, mode: Persistence) -> Result<(), ProviderError> {
        *self.mode.lock() = mode;
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }
}
