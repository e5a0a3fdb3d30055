//! An in-process [`AuthService`] for tests and local development.
//!
//! Accounts live in memory and validation failures use the same messages the
//! Identity Toolkit returns, so code written against the envelope strings
//! behaves the same against both.

use super::federated::FederatedProvider;
use super::models::{Session, UserRecord, PASSWORD_PROVIDER_ID};
use super::session::SessionStore;
use super::{AuthError, AuthService};
use crate::core::auto_id;
use crate::core::subscription::Subscription;
use std::collections::HashMap;
use tokio::sync::Mutex;

const MIN_PASSWORD_LENGTH: usize = 6;
const TOKEN_LIFETIME_SECS: i64 = 3600;

struct Account {
    password: String,
    user: UserRecord,
}

#[derive(Default)]
pub struct MemoryAuthService {
    accounts: Mutex<HashMap<String, Account>>,
    federated: Mutex<HashMap<String, UserRecord>>,
    session: SessionStore,
}

impl MemoryAuthService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `session` instead of a private store, so other components can
    /// read the signed-in state.
    pub fn with_session(session: SessionStore) -> Self {
        Self {
            session,
            ..Default::default()
        }
    }

    /// Makes the provider's consent flow succeed with this identity. Providers
    /// without a registered identity behave as if the user dismissed the flow.
    pub async fn register_federated_identity(
        &self,
        provider_id: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) {
        let user = UserRecord {
            uid: auto_id(),
            email: email.map(str::to_string),
            display_name: display_name.map(str::to_string),
            email_verified: email.is_some(),
            provider_id: provider_id.to_string(),
            is_new_user: false,
        };
        self.federated
            .lock()
            .await
            .insert(provider_id.to_string(), user);
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn issue(&self, user: UserRecord) -> UserRecord {
        let session = Session::new(
            user.clone(),
            format!("memory-id-token-{}", auto_id()),
            format!("memory-refresh-token-{}", auto_id()),
            TOKEN_LIFETIME_SECS,
        );
        self.session.replace(Some(session));
        user
    }
}

fn rejected(message: &str) -> AuthError {
    AuthError::Api {
        code: 400,
        message: message.to_string(),
    }
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn check_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if !is_valid_email(email) {
        return Err(rejected("INVALID_EMAIL"));
    }
    if password.is_empty() {
        return Err(rejected("MISSING_PASSWORD"));
    }
    Ok(())
}

#[async_trait::async_trait]
impl AuthService for MemoryAuthService {
    async fn create_account(&self, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        check_credentials(email, password)?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(rejected(
                "WEAK_PASSWORD : Password should be at least 6 characters",
            ));
        }

        let key = email.to_lowercase();
        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&key) {
            return Err(rejected("EMAIL_EXISTS"));
        }

        let user = UserRecord {
            uid: auto_id(),
            email: Some(email.to_string()),
            display_name: None,
            email_verified: false,
            provider_id: PASSWORD_PROVIDER_ID.to_string(),
            is_new_user: true,
        };
        accounts.insert(
            key,
            Account {
                password: password.to_string(),
                user: UserRecord {
                    is_new_user: false,
                    ..user.clone()
                },
            },
        );
        drop(accounts);

        Ok(self.issue(user))
    }

    async fn verify_credential(&self, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        check_credentials(email, password)?;

        let user = {
            let accounts = self.accounts.lock().await;
            match accounts.get(&email.to_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => return Err(rejected("INVALID_LOGIN_CREDENTIALS")),
            }
        };

        Ok(self.issue(user))
    }

    async fn interactive_federated_sign_in(
        &self,
        provider: &FederatedProvider,
    ) -> Result<UserRecord, AuthError> {
        let user = self
            .federated
            .lock()
            .await
            .get(&provider.provider_id)
            .cloned()
            .ok_or(AuthError::FlowCancelled)?;
        Ok(self.issue(user))
    }

    fn observe_session_state(&self) -> Subscription<Option<UserRecord>> {
        self.session.observe()
    }

    async fn terminate_session(&self) -> Result<(), AuthError> {
        self.session.replace(None);
        Ok(())
    }

    fn current_user(&self) -> Option<UserRecord> {
        self.session.current_user()
    }

    async fn refresh_session(&self) -> Result<UserRecord, AuthError> {
        let current = self.session.current().ok_or(AuthError::NotSignedIn)?;
        Ok(self.issue(current.user))
    }
}
