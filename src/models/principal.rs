// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity-provider records as seen by the coordinator.

use serde::{Deserialize, Serialize};

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Provider id reported for email/password accounts.
pub const PASSWORD_PROVIDER_ID: &str = "password";

/// Provider recorded on a profile when the principal carries no provider data.
pub const DEFAULT_PROFILE_PROVIDER: &str = "email";

/// Authenticated actor as issued by the identity provider.
///
/// Owned by the provider; the coordinator only ever holds a snapshot that is
/// replaced wholesale on every state-changed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Principal {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    /// Linked provider ids in link order (e.g. "password", "google.com").
    #[serde(default)]
    pub provider_ids: Vec<String>,
}

impl Principal {
    /// Provider the principal first signed in with.
    pub fn primary_provider(&self) -> &str {
        self.provider_ids
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_PROFILE_PROVIDER)
    }

    pub fn has_provider(&self, provider_id: &str) -> bool {
        self.provider_ids.iter().any(|p| p == provider_id)
    }
}

/// Federated identity providers the application can sign in with or link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Github,
}

impl ProviderKind {
    pub fn provider_id(self) -> &'static str {
        match self {
            ProviderKind::Google => "google.com",
            ProviderKind::Github => "github.com",
        }
    }
}

/// Token obtained from a federated identity provider's own OAuth flow.
#[derive(Debug, Clone)]
pub struct FederatedCredential {
    pub kind: ProviderKind,
    pub token: FederatedToken,
}

#[derive(Debug, Clone)]
pub enum FederatedToken {
    /// OIDC id token (Google).
    IdToken(String),
    /// OAuth access token (GitHub).
    AccessToken(String),
}

impl FederatedCredential {
    pub fn google(id_token: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Google,
            token: FederatedToken::IdToken(id_token.into()),
        }
    }

    pub fn github(access_token: impl Into<String>) -> Self {
        Self {
            kind: ProviderKind::Github,
            token: FederatedToken::AccessToken(access_token.into()),
        }
    }

    /// Raw token value, regardless of kind.
    pub fn token_value(&self) -> &str {
        match &self.token {
            FederatedToken::IdToken(t) | FederatedToken::AccessToken(t) => t,
        }
    }

    /// Form-encoded body understood by the identity platform's IdP sign-in.
    pub fn post_body(&self) -> String {
        let (field, value) = match &self.token {
            FederatedToken::IdToken(t) => ("id_token", t),
            FederatedToken::AccessToken(t) => ("access_token", t),
        };
        format!("{}={}&providerId={}", field, value, self.kind.provider_id())
    }
}

/// Attributes of the principal that can be changed in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalChanges {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl PrincipalChanges {
    pub fn display_name(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn photo_url(url: impl Into<String>) -> Self {
        Self {
            photo_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.photo_url.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(providers: &[&str]) -> Principal {
        Principal {
            uid: "u1".to_string(),
            email: Some("a@example.com".to_string()),
            email_verified: false,
            display_name: None,
            photo_url: None,
            provider_ids: providers.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn primary_provider_falls_back_to_email() {
        assert_eq!(principal(&[]).primary_provider(), "email");
        assert_eq!(
            principal(&["google.com", "password"]).primary_provider(),
            "google.com"
        );
    }

    #[test]
    fn post_body_uses_token_kind() {
        assert_eq!(
            FederatedCredential::google("abc").post_body(),
            "id_token=abc&providerId=google.com"
        );
        assert_eq!(
            FederatedCredential::github("xyz").post_body(),
            "access_token=xyz&providerId=github.com"
        );
    }
}
