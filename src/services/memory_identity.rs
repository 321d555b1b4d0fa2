// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Offline identity provider for tests and demos.
//!
//! Accounts live in process memory. Failures can be injected one call at a
//! time with [`InMemoryIdentityProvider::fail_next`], and the persistence
//! mode bound by the most recent credential exchange is recorded.
//!
//! Every change to the signed-in principal's record is published, so the
//! last notification always carries the current record.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{ProviderError, ProviderErrorCode};
use crate::models::principal::PASSWORD_PROVIDER_ID;
use crate::models::{FederatedCredential, Principal, PrincipalChanges};
use crate::services::identity::{AuthStateNotifier, IdentityProvider, Persistence, Subscription};

const MIN_PASSWORD_LEN: usize = 6;

struct Account {
    principal: Principal,
    password: Option<String>,
    disabled: bool,
}

struct ProviderState {
    accounts: HashMap<String, Account>,
    uid_by_email: HashMap<String, String>,
    /// (provider id, token) -> uid
    federated: HashMap<(String, String), String>,
    current: Option<String>,
    pending_mode: Persistence,
    bound_mode: Option<Persistence>,
    next_uid: u64,
    fail_next: Option<ProviderError>,
    verification_codes: HashMap<String, String>,
    sent_verifications: Vec<String>,
    sent_resets: Vec<String>,
}

impl ProviderState {
    fn take_failure(&mut self) -> Result<(), ProviderError> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn current_account(&mut self) -> Result<&mut Account, ProviderError> {
        let uid = self
            .current
            .clone()
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::NoCurrentUser))?;
        self.accounts
            .get_mut(&uid)
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::UserNotFound))
    }

    fn new_account(
        &mut self,
        email: Option<String>,
        password: Option<String>,
        provider_id: &str,
    ) -> Principal {
        self.next_uid += 1;
        let uid = format!("uid-{:04}", self.next_uid);
        let principal = Principal {
            uid: uid.clone(),
            email: email.clone(),
            email_verified: false,
            display_name: None,
            photo_url: None,
            provider_ids: vec![provider_id.to_string()],
        };
        if let Some(email) = email {
            self.uid_by_email.insert(email, uid.clone());
        }
        self.accounts.insert(
            uid,
            Account {
                principal: principal.clone(),
                password,
                disabled: false,
            },
        );
        principal
    }

    fn bind_session(&mut self, uid: &str) {
        self.current = Some(uid.to_string());
        self.bound_mode = Some(self.pending_mode);
    }
}

fn check_email(email: &str) -> Result<(), ProviderError> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(ProviderError::from_code(ProviderErrorCode::InvalidEmail))
    }
}

fn check_password(password: &str) -> Result<(), ProviderError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ProviderError::from_code(ProviderErrorCode::WeakPassword));
    }
    Ok(())
}

/// Identity provider backed by in-process account records.
pub struct InMemoryIdentityProvider {
    state: Mutex<ProviderState>,
    notifier: AuthStateNotifier,
}

impl InMemoryIdentityProvider {
    /// Provider that starts resolved with no signed-in principal.
    pub fn new() -> Self {
        Self::with_notifier(AuthStateNotifier::resolved(None))
    }

    /// Provider whose initial state is not known until [`Self::resolve`].
    pub fn unresolved() -> Self {
        Self::with_notifier(AuthStateNotifier::new())
    }

    fn with_notifier(notifier: AuthStateNotifier) -> Self {
        Self {
            state: Mutex::new(ProviderState {
                accounts: HashMap::new(),
                uid_by_email: HashMap::new(),
                federated: HashMap::new(),
                current: None,
                pending_mode: Persistence::Local,
                bound_mode: None,
                next_uid: 0,
                fail_next: None,
                verification_codes: HashMap::new(),
                sent_verifications: Vec::new(),
                sent_resets: Vec::new(),
            }),
            notifier,
        }
    }

    /// Publish the initial state of an unresolved provider.
    pub fn resolve(&self) {
        self.notifier.publish(self.current_principal());
    }

    /// Create an email/password account without signing it in.
    pub fn add_account(&self, email: &str, password: &str) -> Principal {
        let mut state = self.state.lock();
        state.new_account(
            Some(email.to_string()),
            Some(password.to_string()),
            PASSWORD_PROVIDER_ID,
        )
    }

    /// Mark the account for `email` as disabled.
    pub fn disable(&self, email: &str) {
        let mut state = self.state.lock();
        if let Some(uid) = state.uid_by_email.get(email).cloned() {
            if let Some(account) = state.accounts.get_mut(&uid) {
                account.disabled = true;
            }
        }
    }

    /// Fail the next provider call with `err`.
    pub fn fail_next(&self, err: ProviderError) {
        self.state.lock().fail_next = Some(err);
    }

    /// End the session out of band, as a token revocation would.
    pub fn revoke_session(&self) {
        let mut state = self.state.lock();
        state.current = None;
        self.notifier.publish(None);
    }

    pub fn current_principal(&self) -> Option<Principal> {
        let state = self.state.lock();
        state
            .current
            .as_ref()
            .and_then(|uid| state.accounts.get(uid))
            .map(|a| a.principal.clone())
    }

    /// Persistence mode selected for the next exchange.
    pub fn persistence_mode(&self) -> Persistence {
        self.state.lock().pending_mode
    }

    /// Persistence mode bound by the most recent credential exchange.
    pub fn bound_persistence(&self) -> Option<Persistence> {
        self.state.lock().bound_mode
    }

    /// Emails a verification message was sent to, in order.
    pub fn sent_verifications(&self) -> Vec<String> {
        self.state.lock().sent_verifications.clone()
    }

    /// Emails a password reset was sent to, in order.
    pub fn sent_resets(&self) -> Vec<String> {
        self.state.lock().sent_resets.clone()
    }

    /// Most recent verification code issued for `email`.
    pub fn verification_code(&self, email: &str) -> Option<String> {
        let state = self.state.lock();
        let uid = state.uid_by_email.get(email)?;
        state
            .verification_codes
            .iter()
            .find(|(_, target)| *target == uid)
            .map(|(code, _)| code.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        self.notifier.subscriber_count()
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        check_email(email)?;
        check_password(password)?;
        if state.uid_by_email.contains_key(email) {
            return Err(ProviderError::from_code(ProviderErrorCode::EmailExists));
        }

        let principal = state.new_account(
            Some(email.to_string()),
            Some(password.to_string()),
            PASSWORD_PROVIDER_ID,
        );
        state.bind_session(&principal.uid);
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn exchange_credentials(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Principal, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;

        let invalid = || ProviderError::from_code(ProviderErrorCode::InvalidCredential);
        let uid = state.uid_by_email.get(email).cloned().ok_or_else(invalid)?;
        let account = state.accounts.get(&uid).ok_or_else(invalid)?;
        if account.password.as_deref() != Some(password) {
            return Err(invalid());
        }
        if account.disabled {
            return Err(ProviderError::from_code(ProviderErrorCode::UserDisabled));
        }

        let principal = account.principal.clone();
        state.bind_session(&uid);
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_in_federated(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Principal, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;

        let provider_id = credential.kind.provider_id();
        let key = (provider_id.to_string(), credential.token_value().to_string());
        let principal = match state.federated.get(&key).cloned() {
            Some(uid) => {
                let account = state
                    .accounts
                    .get(&uid)
                    .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::UserNotFound))?;
                if account.disabled {
                    return Err(ProviderError::from_code(ProviderErrorCode::UserDisabled));
                }
                account.principal.clone()
            }
            None => {
                let principal = state.new_account(None, None, provider_id);
                state.federated.insert(key, principal.uid.clone());
                principal
            }
        };

        state.bind_session(&principal.uid);
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn end_session(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.current = None;
        self.notifier.publish(None);
        Ok(())
    }

    async fn send_reset(&self, email: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        check_email(email)?;
        if !state.uid_by_email.contains_key(email) {
            return Err(ProviderError::from_code(ProviderErrorCode::UserNotFound));
        }
        state.sent_resets.push(email.to_string());
        Ok(())
    }

    async fn send_verification(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let principal = state.current_account()?.principal.clone();
        let email = principal
            .email
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::InvalidEmail))?;

        let code = format!("verify-{}-{}", principal.uid, state.sent_verifications.len());
        state.verification_codes.retain(|_, uid| *uid != principal.uid);
        state.verification_codes.insert(code, principal.uid);
        state.sent_verifications.push(email);
        Ok(())
    }

    async fn apply_verification_code(&self, code: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let uid = state
            .verification_codes
            .remove(code)
            .ok_or_else(|| ProviderError::from_code(ProviderErrorCode::InvalidActionCode))?;
        if let Some(account) = state.accounts.get_mut(&uid) {
            account.principal.email_verified = true;
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        changes: &PrincipalChanges,
    ) -> Result<Principal, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        let account = state.current_account()?;
        if let Some(name) = &changes.display_name {
            account.principal.display_name = Some(name.clone());
        }
        if let Some(url) = &changes.photo_url {
            account.principal.photo_url = Some(url.clone());
        }
        let principal = account.principal.clone();
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn update_email(&self, email: &str) -> Result<Principal, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        check_email(email)?;
        if state.uid_by_email.contains_key(email) {
            return Err(ProviderError::from_code(ProviderErrorCode::EmailExists));
        }

        let account = state.current_account()?;
        let old = account.principal.email.replace(email.to_string());
        account.principal.email_verified = false;
        let principal = account.principal.clone();

        if let Some(old) = old {
            state.uid_by_email.remove(&old);
        }
        state
            .uid_by_email
            .insert(email.to_string(), principal.uid.clone());
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn update_password(&self, password: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        check_password(password)?;
        let account = state.current_account()?;
        account.password = Some(password.to_string());
        if !account.principal.has_provider(PASSWORD_PROVIDER_ID) {
            account
                .principal
                .provider_ids
                .push(PASSWORD_PROVIDER_ID.to_string());
            self.notifier.publish(Some(account.principal.clone()));
        }
        Ok(())
    }

    async fn reload(&self) -> Result<Option<Principal>, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        if state.current.is_none() {
            return Ok(None);
        }
        let principal = state.current_account()?.principal.clone();
        self.notifier.publish(Some(principal.clone()));
        Ok(Some(principal))
    }

    async fn link_provider(
        &self,
        credential: &FederatedCredential,
    ) -> Result<Principal, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;

        let provider_id = credential.kind.provider_id();
        let key = (provider_id.to_string(), credential.token_value().to_string());
        let uid = state.current_account()?.principal.uid.clone();

        if state.federated.get(&key).is_some_and(|owner| *owner != uid) {
            return Err(ProviderError::from_code(
                ProviderErrorCode::CredentialAlreadyLinked,
            ));
        }
        let account = state.current_account()?;
        if account.principal.has_provider(provider_id) {
            return Err(ProviderError::new(
                ProviderErrorCode::Other("PROVIDER_ALREADY_LINKED".to_string()),
                "User has already been linked to the given provider.",
            ));
        }
        account.principal.provider_ids.push(provider_id.to_string());
        let principal = account.principal.clone();
        state.federated.insert(key, uid);
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn unlink_provider(&self, provider_id: &str) -> Result<Principal, ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;

        let account = state.current_account()?;
        if !account.principal.has_provider(provider_id) {
            return Err(ProviderError::from_code(ProviderErrorCode::NoSuchProvider));
        }
        account.principal.provider_ids.retain(|p| p != provider_id);
        if provider_id == PASSWORD_PROVIDER_ID {
            account.password = None;
        }
        let principal = account.principal.clone();
        state
            .federated
            .retain(|(provider, _), uid| !(provider == provider_id && *uid == principal.uid));
        self.notifier.publish(Some(principal.clone()));
        Ok(principal)
    }

    async fn set_persistence_mode(&self, mode: Persistence) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.take_failure()?;
        state.pending_mode = mode;
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.notifier.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProviderKind;

    #[tokio::test]
    async fn rejects_weak_password_and_duplicate_email() {
        let provider = InMemoryIdentityProvider::new();

        let weak = provider.create_account("a@example.com", "123").await;
        assert_eq!(weak.unwrap_err().code, ProviderErrorCode::WeakPassword);

        provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        let dup = provider.create_account("a@example.com", "secret2").await;
        assert_eq!(dup.unwrap_err().code, ProviderErrorCode::EmailExists);
    }

    #[tokio::test]
    async fn exchange_binds_selected_persistence() {
        let provider = InMemoryIdentityProvider::new();
        provider.add_account("a@example.com", "secret1");

        provider
            .set_persistence_mode(Persistence::Session)
            .await
            .unwrap();
        provider
            .exchange_credentials("a@example.com", "secret1")
            .await
            .unwrap();

        assert_eq!(provider.bound_persistence(), Some(Persistence::Session));
    }

    #[tokio::test]
    async fn disabled_account_cannot_sign_in() {
        let provider = InMemoryIdentityProvider::new();
        provider.add_account("a@example.com", "secret1");
        provider.disable("a@example.com");

        let err = provider
            .exchange_credentials("a@example.com", "secret1")
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::UserDisabled);
    }

    #[tokio::test]
    async fn verification_code_marks_email_verified() {
        let provider = InMemoryIdentityProvider::new();
        provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        provider.send_verification().await.unwrap();

        let code = provider.verification_code("a@example.com").unwrap();
        provider.apply_verification_code(&code).await.unwrap();

        assert!(provider.reload().await.unwrap().unwrap().email_verified);
        let reused = provider.apply_verification_code(&code).await.unwrap_err();
        assert_eq!(reused.code, ProviderErrorCode::InvalidActionCode);
    }

    #[tokio::test]
    async fn federated_credential_links_to_one_account() {
        let provider = InMemoryIdentityProvider::new();
        let google = FederatedCredential::google("tok");

        provider
            .create_account("a@example.com", "secret1")
            .await
            .unwrap();
        let linked = provider.link_provider(&google).await.unwrap();
        assert!(linked.has_provider(ProviderKind::Google.provider_id()));

        provider
            .create_account("b@example.com", "secret1")
            .await
            .unwrap();
        let err = provider.link_provider(&google).await.unwrap_err();
        assert_eq!(err.code, ProviderErrorCode::CredentialAlreadyLinked);
    }
}
