//! Authentication facade.
//!
//! [`AuthFacade`] turns every call on an [`AuthService`] into a
//! [`ResultEnvelope`] and exposes session changes as a [`Subscription`].
//!
//! # Examples
//!
//! ```rust,no_run
//! # use firebase_client_facade::FirebaseApp;
//! # async fn run(app: FirebaseApp) {
//! let auth = app.auth();
//!
//! let mut states = auth.on_auth_state_change();
//! let outcome = auth.sign_in("alice@example.com", "correct-horse").await;
//! if let Some(user) = outcome.data() {
//!     println!("signed in as {}", user.uid);
//! }
//! while let Some(state) = states.next().await {
//!     println!("signed in: {}", state.signed_in);
//! }
//! # }
//! ```

pub mod federated;
pub mod identity_toolkit;
pub mod memory;
pub mod models;
pub mod session;

#[cfg(test)]
mod tests;

use self::federated::FederatedProvider;
use self::models::{AuthState, UserRecord};
use crate::core::envelope::ResultEnvelope;
use crate::core::observer::{settle, FacadeObserver, TracingObserver};
use crate::core::subscription::Subscription;
use crate::core::ApiFailure;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during authentication operations.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),
    /// Rejection by the service; the message is the service's own.
    #[error("{message}")]
    Api { code: u16, message: String },
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("The sign-in flow was cancelled by the user")]
    FlowCancelled,
    #[error("No consent flow is configured for provider {0}")]
    NoConsentFlow(String),
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
    #[error("No user is signed in")]
    NotSignedIn,
}

impl From<ApiFailure> for AuthError {
    fn from(failure: ApiFailure) -> Self {
        Self::Api {
            code: failure.code,
            message: failure.message,
        }
    }
}

/// The authentication service boundary.
///
/// The service owns the session: successful sign-up and sign-in calls make
/// the returned user current, `terminate_session` clears it.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> Result<UserRecord, AuthError>;

    async fn verify_credential(&self, email: &str, password: &str) -> Result<UserRecord, AuthError>;

    async fn interactive_federated_sign_in(
        &self,
        provider: &FederatedProvider,
    ) -> Result<UserRecord, AuthError>;

    /// Yields the current user immediately and again after every change.
    fn observe_session_state(&self) -> Subscription<Option<UserRecord>>;

    async fn terminate_session(&self) -> Result<(), AuthError>;

    fn current_user(&self) -> Option<UserRecord>;

    async fn refresh_session(&self) -> Result<UserRecord, AuthError>;
}

/// Envelope-returning front for an [`AuthService`].
pub struct AuthFacade<S> {
    service: S,
    provider: FederatedProvider,
    observer: Arc<dyn FacadeObserver>,
}

impl<S: AuthService> AuthFacade<S> {
    /// Wraps `service`. Federated sign-in defaults to Google and outcomes are
    /// reported through [`TracingObserver`].
    pub fn new(service: S) -> Self {
        Self {
            service,
            provider: FederatedProvider::google(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FacadeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_provider(mut self, provider: FederatedProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> ResultEnvelope<UserRecord> {
        let result = self.service.create_account(email, password).await;
        settle(self.observer.as_ref(), "sign_up", result, |user| {
            format!("user created: {}", user.uid)
        })
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> ResultEnvelope<UserRecord> {
        let result = self.service.verify_credential(email, password).await;
        settle(self.observer.as_ref(), "sign_in", result, |user| {
            format!("signed in: {}", user.email.as_deref().unwrap_or(&user.uid))
        })
    }

    /// Runs the provider's consent flow; suspends until the user finishes or
    /// dismisses it.
    pub async fn sign_in_with_federated_provider(&self) -> ResultEnvelope<UserRecord> {
        let result = self
            .service
            .interactive_federated_sign_in(&self.provider)
            .await;
        settle(
            self.observer.as_ref(),
            "sign_in_with_federated_provider",
            result,
            |user| {
                format!(
                    "{} sign in: {}",
                    self.provider.provider_id,
                    user.display_name.as_deref().unwrap_or(&user.uid)
                )
            },
        )
    }

    /// Current state first, then every transition. Cancel (or drop) the
    /// subscription to stop listening.
    pub fn on_auth_state_change(&self) -> Subscription<AuthState> {
        let observer = Arc::clone(&self.observer);
        self.service.observe_session_state().map(move |user| {
            let state = AuthState::from(user);
            match &state.user {
                Some(user) => observer.delivered(
                    "auth_state",
                    &format!("user signed in: {}", user.email.as_deref().unwrap_or(&user.uid)),
                ),
                None => observer.delivered("auth_state", "user signed out"),
            }
            state
        })
    }

    pub async fn logout(&self) -> ResultEnvelope<()> {
        let result = self.service.terminate_session().await;
        settle(self.observer.as_ref(), "logout", result, |_| {
            "signed out".to_string()
        })
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        self.service.current_user()
    }

    pub async fn refresh_session(&self) -> ResultEnvelope<UserRecord> {
        let result = self.service.refresh_session().await;
        settle(self.observer.as_ref(), "refresh_session", result, |user| {
            format!("session refreshed: {}", user.uid)
        })
    }
}
