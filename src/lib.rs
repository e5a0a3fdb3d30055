//! Client-side facades over Firebase Authentication and Cloud Firestore.
//!
//! Every operation returns a [`ResultEnvelope`] instead of an error, and
//! real-time listeners are exposed as cancellable [`Subscription`] streams.
//!
//! ```rust,no_run
//! use firebase_client_facade::{FirebaseApp, FirebaseOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let app = FirebaseApp::new(FirebaseOptions::from_env()?)?;
//!
//! let signed_in = app.auth().sign_in("alice@example.com", "correct-horse").await;
//! if let Some(message) = signed_in.error() {
//!     eprintln!("{}", message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod core;
#[cfg(feature = "firestore")]
pub mod firestore;

pub use crate::auth::{AuthError, AuthFacade, AuthService};
pub use crate::config::{ConfigError, FirebaseOptions};
pub use crate::core::envelope::ResultEnvelope;
pub use crate::core::observer::{FacadeObserver, NoopObserver, TracingObserver};
pub use crate::core::subscription::Subscription;
#[cfg(feature = "firestore")]
pub use crate::firestore::{DocumentStore, DocumentStoreFacade, FirestoreError};

use auth::identity_toolkit::IdentityToolkitClient;
use auth::session::SessionStore;
#[cfg(feature = "firestore")]
use firestore::rest::FirestoreRestClient;
use reqwest::Client;

/// A configured Firebase project.
///
/// The HTTP client and the session are shared by every service built from
/// the app, so a user signed in through [`FirebaseApp::auth`] is the user
/// Firestore requests are made as.
#[derive(Clone)]
pub struct FirebaseApp {
    options: FirebaseOptions,
    http: Client,
    session: SessionStore,
}

impl FirebaseApp {
    pub fn new(options: FirebaseOptions) -> Result<Self, ConfigError> {
        Self::with_http_client(options, Client::new())
    }

    /// Uses `http` for every request, e.g. a client with custom timeouts.
    pub fn with_http_client(options: FirebaseOptions, http: Client) -> Result<Self, ConfigError> {
        options.validate()?;
        tracing::debug!(project_id = %options.project_id, "firebase app configured");
        Ok(Self {
            options,
            http,
            session: SessionStore::new(),
        })
    }

    pub fn options(&self) -> &FirebaseOptions {
        &self.options
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn auth(&self) -> AuthFacade<IdentityToolkitClient> {
        AuthFacade::new(IdentityToolkitClient::new(
            &self.options,
            self.http.clone(),
            self.session.clone(),
        ))
    }

    #[cfg(feature = "firestore")]
    pub fn firestore(&self) -> DocumentStoreFacade<FirestoreRestClient> {
        DocumentStoreFacade::new(FirestoreRestClient::new(
            &self.options,
            self.http.clone(),
            self.session.clone(),
        ))
    }
}
