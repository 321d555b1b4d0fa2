// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore-backed profile store.
//!
//! Profiles live in a single collection keyed by principal uid:
//! - `get` reads one document
//! - `create` writes with an "absent" precondition and fails if the document exists
//! - `update` writes only the fields named in the update mask, to an existing document
//! - `record_login` runs the read-increment-write inside a transaction
//!
//! `createdAt` and `lastLoginAt` are never written from the client clock. They
//! are set by a request-time transform, so Firestore stamps them with its own
//! commit time. The timestamps in the written values are placeholders.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use firestore::errors::FirestoreError;
use firestore::{FirestoreTransformServerValue, FirestoreWritePrecondition};

use crate::db::{collections, ProfileStore};
use crate::error::StoreError;
use crate::models::{Profile, ProfileUpdate};

/// Firestore profile store.
#[derive(Clone)]
pub struct FirestoreProfileStore {
    client: Option<firestore::FirestoreDb>,
    collection: String,
}

impl FirestoreProfileStore {
    /// Connect to Firestore.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, StoreError> {
        Self::with_collection(project_id, collections::USERS).await
    }

    /// Connect to Firestore, storing profiles in `collection`.
    pub async fn with_collection(project_id: &str, collection: &str) -> Result<Self, StoreError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id, collection).await;
        }

        let client = firestore::FirestoreDb::new(project_id).await.map_err(|e| {
            StoreError::Database(format!("Failed to connect to Firestore: {}", e))
        })?;

        tracing::info!(project = project_id, collection, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
            collection: collection.to_string(),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str, collection: &str) -> Result<Self, StoreError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            StoreError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            collection,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
            collection: collection.to_string(),
        })
    }

    /// Create an offline store for testing.
    ///
    /// All profile operations will return an error if called.
    pub fn new_mock() -> Self {
        Self {
            client: None,
            collection: collections::USERS.to_string(),
        }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, StoreError> {
        self.client
            .as_ref()
            .ok_or_else(|| StoreError::Database("Database not connected (offline mode)".to_string()))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl ProfileStore for FirestoreProfileStore {
    async fn get(&self, uid: &str) -> Result<Option<Profile>, StoreError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(self.collection.as_str())
            .obj()
            .one(uid)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn create(&self, profile: &Profile) -> Result<(), StoreError> {
        let _: Profile = self
            .get_client()?
            .fluent()
            .update()
            .fields(Profile::VALUE_FIELDS.iter().copied())
            .in_col(self.collection.as_str())
            .precondition(FirestoreWritePrecondition::Exists(false))
            .document_id(&profile.id)
            .object(profile)
            .transforms(|t| {
                let stamps: Vec<_> = Profile::TIMESTAMP_FIELDS
                    .iter()
                    .map(|field| t.field(*field).server_value(FirestoreTransformServerValue::RequestTime))
                    .collect();
                t.fields(stamps)
            })
            .execute()
            .await
            .map_err(|e| match e {
                FirestoreError::DataConflictError(_) => {
                    StoreError::AlreadyExists(profile.id.clone())
                }
                other => StoreError::Database(other.to_string()),
            })?;

        tracing::debug!(uid = %profile.id, "Profile document created");
        Ok(())
    }

    async fn update(&self, uid: &str, update: &ProfileUpdate) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }

        let stamps = update.timestamp_paths();
        let _: Profile = self
            .get_client()?
            .fluent()
            .update()
            .fields(update.value_paths())
            .in_col(self.collection.as_str())
            .precondition(FirestoreWritePrecondition::Exists(true))
            .document_id(uid)
            .object(update)
            .transforms(|t| {
                let stamps: Vec<_> = stamps
                    .iter()
                    .map(|field| t.field(*field).server_value(FirestoreTransformServerValue::RequestTime))
                    .collect();
                t.fields(stamps)
            })
            .execute()
            .await
            .map_err(|e| match e {
                FirestoreError::DataNotFoundError(_) => StoreError::NotFound(uid.to_string()),
                other => StoreError::Database(other.to_string()),
            })?;
        Ok(())
    }

    /// Placeholder for the commit time Firestore stamps on write.
    ///
    /// Timestamp fields are resolved server-side, so this value only
    /// approximates what ends up in the document; re-read for the real one.
    fn server_timestamp(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn record_login(
        &self,
        uid: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Profile>, StoreError> {
        let client = self.get_client()?;

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Read through the transaction so a concurrent writer forces a retry
        let tx_db = client.clone_with_consistency_selector(
            firestore::FirestoreConsistencySelector::Transaction(
                transaction.transaction_id().clone(),
            ),
        );

        let current: Option<Profile> = tx_db
            .fluent()
            .select()
            .by_id_in(self.collection.as_str())
            .obj()
            .one(uid)
            .await
            .map_err(|e| {
                StoreError::Database(format!("Failed to read profile in transaction: {}", e))
            })?;

        let Some(mut profile) = current else {
            let _ = transaction.rollback().await;
            return Ok(None);
        };

        let update = ProfileUpdate::login(at, profile.login_count + 1);
        let stamps = update.timestamp_paths();

        client
            .fluent()
            .update()
            .fields(update.value_paths())
            .in_col(self.collection.as_str())
            .document_id(uid)
            .object(&update)
            .transforms(|t| {
                let stamps: Vec<_> = stamps
                    .iter()
                    .map(|field| t.field(*field).server_value(FirestoreTransformServerValue::RequestTime))
                    .collect();
                t.fields(stamps)
            })
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                StoreError::Database(format!("Failed to add profile to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| StoreError::Database(format!("Transaction commit failed: {}", e)))?;

        // Pick up the commit time Firestore stamped on lastLoginAt
        match self.get(uid).await {
            Ok(Some(stored)) => profile = stored,
            Ok(None) => update.apply_to(&mut profile),
            Err(e) => {
                tracing::warn!(uid, error = %e, "Could not re-read profile after login");
                update.apply_to(&mut profile);
            }
        }

        tracing::debug!(uid, login_count = profile.login_count, "Login recorded atomically");

        Ok(Some(profile))
    }
}
