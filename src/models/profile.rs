// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile document mirrored in the profile store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::Principal;

/// Profile document stored in Firestore.
///
/// Stored at: `users/{uid}`
///
/// Created on the first successful authentication of a principal and only
/// ever updated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Profile {
    /// Principal uid (also used as document ID)
    #[serde(rename = "uid")]
    pub id: String,
    /// Email address ("" if the principal has none)
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    /// Provider the profile was first created through
    pub provider: String,
    /// Set once, on creation
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
    #[serde(default)]
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub login_count: u64,
}

impl Profile {
    /// Document fields written by value.
    pub const VALUE_FIELDS: &'static [&'static str] = &[
        "uid",
        "email",
        "displayName",
        "photoUrl",
        "emailVerified",
        "provider",
        "loginCount",
    ];

    /// Document fields a store may stamp with its own clock.
    pub const TIMESTAMP_FIELDS: &'static [&'static str] = &["createdAt", "lastLoginAt"];

    /// Fresh profile for a principal authenticating for the first time.
    pub fn from_principal(principal: &Principal, at: DateTime<Utc>) -> Self {
        Self {
            id: principal.uid.clone(),
            email: principal.email.clone().unwrap_or_default(),
            display_name: principal.display_name.clone(),
            photo_url: principal.photo_url.clone(),
            email_verified: principal.email_verified,
            provider: principal.primary_provider().to_string(),
            created_at: at,
            last_login_at: at,
            login_count: 1,
        }
    }
}

/// Partial write against an existing profile. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_count: Option<u64>,
}

impl ProfileUpdate {
    /// Login bookkeeping: new last-login time and the already-incremented count.
    pub fn login(at: DateTime<Utc>, login_count: u64) -> Self {
        Self {
            last_login_at: Some(at),
            login_count: Some(login_count),
        }
    }

    /// Document field paths touched by this update (Firestore update mask).
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::with_capacity(2);
        if self.last_login_at.is_some() {
            paths.push("lastLoginAt");
        }
        if self.login_count.is_some() {
            paths.push("loginCount");
        }
        paths
    }

    /// Masked fields written by value.
    pub fn value_paths(&self) -> Vec<&'static str> {
        self.field_paths()
            .into_iter()
            .filter(|path| !Profile::TIMESTAMP_FIELDS.contains(path))
            .collect()
    }

    /// Masked fields that carry a timestamp the store may resolve itself.
    pub fn timestamp_paths(&self) -> Vec<&'static str> {
        self.field_paths()
            .into_iter()
            .filter(|path| Profile::TIMESTAMP_FIELDS.contains(path))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.field_paths().is_empty()
    }

    /// Apply the update to an in-memory copy of the document.
    ///
    /// `last_login_at` never moves backwards.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(at) = self.last_login_at {
            profile.last_login_at = profile.last_login_at.max(at);
        }
        if let Some(count) = self.login_count {
            profile.login_count = count;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn principal() -> Principal {
        Principal {
            uid: "uid-1".to_string(),
            email: None,
            email_verified: true,
            display_name: Some("Ada".to_string()),
            photo_url: None,
            provider_ids: vec!["password".to_string()],
        }
    }

    #[test]
    fn new_profile_starts_at_one_login() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let profile = Profile::from_principal(&principal(), at);

        assert_eq!(profile.id, "uid-1");
        assert_eq!(profile.email, "");
        assert_eq!(profile.provider, "password");
        assert_eq!(profile.login_count, 1);
        assert_eq!(profile.created_at, profile.last_login_at);
    }

    #[test]
    fn update_mask_lists_only_set_fields() {
        let at = Utc::now();
        assert_eq!(
            ProfileUpdate::login(at, 3).field_paths(),
            vec!["lastLoginAt", "loginCount"]
        );
        assert!(ProfileUpdate::default().is_empty());
    }

    #[test]
    fn timestamp_fields_are_split_from_values() {
        let update = ProfileUpdate::login(Utc::now(), 3);
        assert_eq!(update.value_paths(), vec!["loginCount"]);
        assert_eq!(update.timestamp_paths(), vec!["lastLoginAt"]);
    }

    #[test]
    fn field_lists_cover_the_stored_document() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut full = Profile::from_principal(&principal(), at);
        full.photo_url = Some("https://example.com/a.png".to_string());
        full.email = "a@example.com".to_string();
        let json = serde_json::to_value(full).unwrap();

        let mut keys: Vec<&str> = json
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();

        let mut expected: Vec<&str> = Profile::VALUE_FIELDS
            .iter()
            .chain(Profile::TIMESTAMP_FIELDS)
            .copied()
            .collect();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[test]
    fn apply_keeps_last_login_monotonic() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut profile = Profile::from_principal(&principal(), at);

        ProfileUpdate::login(at - Duration::seconds(10), 2).apply_to(&mut profile);

        assert_eq!(profile.last_login_at, at);
        assert_eq!(profile.login_count, 2);
        assert_eq!(profile.created_at, at);
    }

    #[test]
    fn stored_document_uses_camel_case_keys() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let json = serde_json::to_value(Profile::from_principal(&principal(), at)).unwrap();

        assert_eq!(json["uid"], "uid-1");
        assert_eq!(json["loginCount"], 1);
        assert!(json.get("lastLoginAt").is_some());
        assert!(json.get("photoUrl").is_none());
    }

    #[test]
    fn missing_login_count_reads_as_zero() {
        let json = serde_json::json!({
            "uid": "legacy",
            "provider": "email",
            "createdAt": "2025-01-01T00:00:00Z",
            "lastLoginAt": "2025-01-01T00:00:00Z"
        });
        let profile: Profile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.login_count, 0);
    }
}
