use super::federated::{ConsentFlow, FederatedProvider};
use super::models::{
    parse_expires_in, PasswordRequest, RefreshTokenRequest, RefreshTokenResponse, Session,
    SignInResponse, SignInWithIdpRequest, UserRecord, PASSWORD_PROVIDER_ID,
};
use super::session::SessionStore;
use super::{AuthError, AuthService};
use crate::config::FirebaseOptions;
use crate::core::middleware::ApiKeyMiddleware;
use crate::core::subscription::Subscription;
use crate::core::{build_client, parse_error_response};
use reqwest::{header, Client};
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const IDP_REQUEST_URI: &str = "http://localhost";

async fn post_json<Req: Serialize + ?Sized, Res: DeserializeOwned>(
    client: &ClientWithMiddleware,
    url: &str,
    request: &Req,
    default_msg: &str,
) -> Result<Res, AuthError> {
    let response = client
        .post(url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(request)?)
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(parse_error_response(response, default_msg).await.into());
    }

    Ok(response.json().await?)
}

/// Exchanges refresh tokens at the Secure Token `token` endpoint and
/// publishes the new tokens into the session store.
#[derive(Clone)]
pub struct TokenRefresher {
    client: ClientWithMiddleware,
    token_url: String,
    session: SessionStore,
}

impl TokenRefresher {
    /// `client` is expected to carry the API key middleware.
    pub fn new(client: ClientWithMiddleware, token_url: String, session: SessionStore) -> Self {
        Self {
            client,
            token_url: token_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    /// Trades `current`'s refresh token for new tokens. The store only takes
    /// them while it still holds `current`.
    pub async fn refresh(&self, current: Session) -> Result<Session, AuthError> {
        let url = format!("{}/token", self.token_url);
        let request = RefreshTokenRequest {
            grant_type: "refresh_token",
            refresh_token: current.refresh_token(),
        };

        let response: RefreshTokenResponse =
            post_json(&self.client, &url, &request, "Token refresh failed").await?;
        let expires_in = parse_expires_in(response.expires_in.as_deref());
        let session = Session::new(
            current.user.clone(),
            response.id_token,
            response.refresh_token,
            expires_in,
        );
        self.session
            .replace_refreshed(current.refresh_token(), session.clone());
        Ok(session)
    }

    /// The stored session, refreshed first when its ID token has expired.
    pub async fn fresh_session(&self) -> Result<Option<Session>, AuthError> {
        match self.session.current() {
            Some(session) if session.is_expired() => {
                tracing::debug!(uid = %session.user.uid, "refreshing expired id token");
                self.refresh(session).await.map(Some)
            }
            other => Ok(other),
        }
    }
}

/// [`AuthService`] backed by the Identity Toolkit and Secure Token REST APIs.
#[derive(Clone)]
pub struct IdentityToolkitClient {
    client: ClientWithMiddleware,
    identity_url: String,
    refresher: TokenRefresher,
    session: SessionStore,
    consent_flow: Option<Arc<dyn ConsentFlow>>,
}

impl IdentityToolkitClient {
    /// Creates a client for the project described by `options`, publishing
    /// sessions into `session`.
    pub fn new(options: &FirebaseOptions, http: Client, session: SessionStore) -> Self {
        let client = build_client(
            http,
            options.max_transport_retries,
            vec![Arc::new(ApiKeyMiddleware::new(options.api_key.clone()))],
        );
        Self::new_with_client(
            client,
            options.identity_toolkit_url().to_string(),
            options.secure_token_url().to_string(),
            session,
        )
    }

    /// Creates a client with a prepared HTTP client and base URLs. The client
    /// is expected to carry the API key middleware.
    pub fn new_with_client(
        client: ClientWithMiddleware,
        identity_url: String,
        token_url: String,
        session: SessionStore,
    ) -> Self {
        Self {
            refresher: TokenRefresher::new(client.clone(), token_url, session.clone()),
            client,
            identity_url: identity_url.trim_end_matches('/').to_string(),
            session,
            consent_flow: None,
        }
    }

    /// Installs the flow used by [`AuthService::interactive_federated_sign_in`].
    pub fn with_consent_flow(mut self, flow: Arc<dyn ConsentFlow>) -> Self {
        self.consent_flow = Some(flow);
        self
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    async fn post<Req: Serialize + ?Sized, Res: DeserializeOwned>(
        &self,
        url: &str,
        request: &Req,
        default_msg: &str,
    ) -> Result<Res, AuthError> {
        post_json(&self.client, url, request, default_msg).await
    }

    fn establish(&self, session: Session) -> UserRecord {
        let user = session.user.clone();
        self.session.replace(Some(session));
        user
    }
}

#[async_trait::async_trait]
impl AuthService for IdentityToolkitClient {
    async fn create_account(&self, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        let url = format!("{}/accounts:signUp", self.identity_url);
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };

        let response: SignInResponse = self.post(&url, &request, "Sign up failed").await?;
        Ok(self.establish(response.into_session(PASSWORD_PROVIDER_ID, true)))
    }

    async fn verify_credential(&self, email: &str, password: &str) -> Result<UserRecord, AuthError> {
        let url = format!("{}/accounts:signInWithPassword", self.identity_url);
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };

        let response: SignInResponse = self.post(&url, &request, "Sign in failed").await?;
        Ok(self.establish(response.into_session(PASSWORD_PROVIDER_ID, false)))
    }

    async fn interactive_federated_sign_in(
        &self,
        provider: &FederatedProvider,
    ) -> Result<UserRecord, AuthError> {
        let flow = self
            .consent_flow
            .as_ref()
            .ok_or_else(|| AuthError::NoConsentFlow(provider.provider_id.clone()))?;
        let credential = flow.authorize(provider).await?;

        let url = format!("{}/accounts:signInWithIdp", self.identity_url);
        let request = SignInWithIdpRequest {
            post_body: credential.post_body(&provider.provider_id)?,
            request_uri: IDP_REQUEST_URI.to_string(),
            return_secure_token: true,
            return_idp_credential: true,
        };

        let response: SignInResponse = self
            .post(&url, &request, "Federated sign in failed")
            .await?;
        Ok(self.establish(response.into_session(&provider.provider_id, false)))
    }

    fn observe_session_state(&self) -> Subscription<Option<UserRecord>> {
        self.session.observe()
    }

    async fn terminate_session(&self) -> Result<(), AuthError> {
        // Sign-out is local: ID tokens stay valid until they expire.
        self.session.replace(None);
        Ok(())
    }

    fn current_user(&self) -> Option<UserRecord> {
        self.session.current_user()
    }

    async fn refresh_session(&self) -> Result<UserRecord, AuthError> {
        let current = self.session.current().ok_or(AuthError::NotSignedIn)?;
        let session = self.refresher.refresh(current).await?;
        Ok(session.user)
    }
}
