use super::federated::{ConsentFlow, FederatedProvider, IdpCredential, ProvidedCredential};
use super::identity_toolkit::IdentityToolkitClient;
use super::memory::MemoryAuthService;
use super::models::Session;
use super::session::SessionStore;
use super::*;
use crate::core::middleware::ApiKeyMiddleware;
use crate::core::observer::NoopObserver;
use httpmock::prelude::*;
use reqwest::Client;
use reqwest_middleware::ClientBuilder;
use serde_json::json;
use std::sync::Mutex;

fn rest_client(server: &MockServer) -> IdentityToolkitClient {
    let client = ClientBuilder::new(Client::new())
        .with(ApiKeyMiddleware::new("test-key"))
        .build();
    IdentityToolkitClient::new_with_client(
        client,
        server.url("/identitytoolkit/v1"),
        server.url("/securetoken/v1"),
        SessionStore::new(),
    )
}

fn memory_facade() -> AuthFacade<MemoryAuthService> {
    AuthFacade::new(MemoryAuthService::new()).with_observer(Arc::new(NoopObserver))
}

fn sign_in_body(email: &str) -> serde_json::Value {
    json!({
        "kind": "identitytoolkit#VerifyPasswordResponse",
        "localId": "uid-alice",
        "email": email,
        "displayName": "Alice",
        "idToken": "id-token-1",
        "refreshToken": "refresh-token-1",
        "expiresIn": "3600",
        "registered": true
    })
}

#[tokio::test]
async fn test_sign_up_sends_credentials_with_api_key() {
    let server = MockServer::start_async().await;
    let auth = AuthFacade::new(rest_client(&server)).with_observer(Arc::new(NoopObserver));

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/identitytoolkit/v1/accounts:signUp")
                .query_param("key", "test-key")
                .header("content-type", "application/json")
                .json_body(json!({
                    "email": "alice@example.com",
                    "password": "secret123",
                    "returnSecureToken": true
                }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "localId": "uid-alice",
                    "email": "alice@example.com",
                    "idToken": "id-token-1",
                    "refreshToken": "refresh-token-1",
                    "expiresIn": "3600"
                }));
        })
        .await;

    let outcome = auth.sign_up("alice@example.com", "secret123").await;

    mock.assert_async().await;
    let user = outcome.data().unwrap();
    assert_eq!(user.uid, "uid-alice");
    assert_eq!(user.provider_id, "password");
    assert!(user.is_new_user);
    assert_eq!(auth.current_user().unwrap().uid, "uid-alice");
    assert_eq!(
        auth.service().session().id_token().as_deref(),
        Some("id-token-1")
    );
}

#[tokio::test]
async fn test_service_error_message_is_passed_through_verbatim() {
    let server = MockServer::start_async().await;
    let auth = AuthFacade::new(rest_client(&server)).with_observer(Arc::new(NoopObserver));

    server
        .mock_async(|when, then| {
            when.method(POST).path("/identitytoolkit/v1/accounts:signUp");
            then.status(400)
                .header("content-type", "application/json")
                .json_body(json!({
                    "error": {
                        "code": 400,
                        "message": "EMAIL_EXISTS",
                        "errors": [
                            { "message": "EMAIL_EXISTS", "domain": "global", "reason": "invalid" }
                        ]
                    }
                }));
        })
        .await;

    let outcome = auth.sign_up("alice@example.com", "secret123").await;

    assert!(!outcome.is_success());
    assert!(outcome.data().is_none());
    assert_eq!(outcome.error(), Some("EMAIL_EXISTS"));
    assert!(auth.current_user().is_none());
}

#[tokio::test]
async fn test_non_json_error_body_still_yields_message() {
    let server = MockServer::start_async().await;
    let auth = AuthFacade::new(rest_client(&server)).with_observer(Arc::new(NoopObserver));

    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/identitytoolkit/v1/accounts:signInWithPassword");
            then.status(503).body("upstream unavailable");
        })
        .await;

    let outcome = auth.sign_in("alice@example.com", "secret123").await;

    let error = outcome.error().unwrap();
    assert!(error.contains("503"));
    assert!(error.contains("upstream unavailable"));
}

#[tokio::test]
async fn test_sign_in_publishes_state_change() {
    let server = MockServer::start_async().await;
    let auth = AuthFacade::new(rest_client(&server)).with_observer(Arc::new(NoopObserver));

    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/identitytoolkit/v1/accounts:signInWithPassword")
                .json_body(json!({
                    "email": "alice@example.com",
                    "password": "secret123",
                    "returnSecureToken": true
                }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(sign_in_body("alice@example.com"));
        })
        .await;

    let mut states = auth.on_auth_state_change();
    let initial = states.next().await.unwrap();
    assert!(!initial.signed_in);
    assert!(initial.user.is_none());

    let outcome = auth.sign_in("alice@example.com", "secret123").await;
    assert_eq!(outcome.data().unwrap().display_name.as_deref(), Some("Alice"));

    let state = states.next().await.unwrap();
    assert!(state.signed_in);
    assert_eq!(state.user.unwrap().uid, "uid-alice");

    assert!(auth.logout().await.is_success());
    let state = states.next().await.unwrap();
    assert!(!state.signed_in);
}

struct RecordingFlow {
    seen: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ConsentFlow for RecordingFlow {
    async fn authorize(&self, provider: &FederatedProvider) -> Result<IdpCredential, AuthError> {
        self.seen.lock().unwrap().push(provider.provider_id.clone());
        Ok(IdpCredential::from_id_token("google-id-token"))
    }
}

struct DismissedFlow;

#[async_trait::async_trait]
impl ConsentFlow for DismissedFlow {
    async fn authorize(&self, _provider: &FederatedProvider) -> Result<IdpCredential, AuthError> {
        Err(AuthError::FlowCancelled)
    }
}

#[tokio::test]
async fn test_federated_sign_in_exchanges_provider_credential() {
    let server = MockServer::start_async().await;
    let flow = Arc::new(RecordingFlow {
        seen: Mutex::new(Vec::new()),
    });
    let auth = AuthFacade::new(rest_client(&server).with_consent_flow(flow.clone()))
        .with_observer(Arc::new(NoopObserver));

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/identitytoolkit/v1/accounts:signInWithIdp")
                .json_body(json!({
                    "postBody": "id_token=google-id-token&providerId=google.com",
                    "requestUri": "http://localhost",
                    "returnSecureToken": true,
                    "returnIdpCredential": true
                }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "federatedId": "https://accounts.google.com/1234",
                    "providerId": "google.com",
                    "localId": "uid-google",
                    "email": "alice@gmail.com",
                    "emailVerified": true,
                    "displayName": "Alice G",
                    "idToken": "id-token-2",
                    "refreshToken": "refresh-token-2",
                    "expiresIn": "3600",
                    "isNewUser": true
                }));
        })
        .await;

    let outcome = auth.sign_in_with_federated_provider().await;

    mock.assert_async().await;
    let user = outcome.data().unwrap();
    assert_eq!(user.provider_id, "google.com");
    assert!(user.email_verified);
    assert!(user.is_new_user);
    assert_eq!(flow.seen.lock().unwrap().as_slice(), ["google.com"]);
}

#[tokio::test]
async fn test_dismissed_consent_flow_is_a_failure() {
    let server = MockServer::start_async().await;
    let auth = AuthFacade::new(rest_client(&server).with_consent_flow(Arc::new(DismissedFlow)))
        .with_observer(Arc::new(NoopObserver));

    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/identitytoolkit/v1/accounts:signInWithIdp");
            then.status(200);
        })
        .await;

    let outcome = auth.sign_in_with_federated_provider().await;

    assert!(!outcome.is_success());
    assert!(!outcome.error().unwrap().is_empty());
    assert_eq!(mock.hits_async().await, 0);
    assert!(auth.current_user().is_none());
}

#[tokio::test]
async fn test_federated_sign_in_without_flow_fails() {
    let server = MockServer::start_async().await;
    let auth = AuthFacade::new(rest_client(&server)).with_observer(Arc::new(NoopObserver));

    let outcome = auth.sign_in_with_federated_provider().await;

    assert_eq!(
        outcome.error(),
        Some("No consent flow is configured for provider google.com")
    );
}

#[tokio::test]
async fn test_refresh_session_swaps_tokens() {
    let server = MockServer::start_async().await;
    let auth = AuthFacade::new(
        rest_client(&server).with_consent_flow(Arc::new(ProvidedCredential(
            IdpCredential::from_access_token("gh-access"),
        ))),
    )
    .with_provider(FederatedProvider::new("github.com"))
    .with_observer(Arc::new(NoopObserver));

    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/identitytoolkit/v1/accounts:signInWithIdp")
                .body_includes("access_token=gh-access&providerId=github.com");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "providerId": "github.com",
                    "localId": "uid-gh",
                    "idToken": "id-token-old",
                    "refreshToken": "refresh-old",
                    "expiresIn": "3600"
                }));
        })
        .await;
    let refresh = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/securetoken/v1/token")
                .query_param("key", "test-key")
                .json_body(json!({
                    "grant_type": "refresh_token",
                    "refresh_token": "refresh-old"
                }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "expires_in": "3600",
                    "token_type": "Bearer",
                    "refresh_token": "refresh-new",
                    "id_token": "id-token-new",
                    "user_id": "uid-gh",
                    "project_id": "1234"
                }));
        })
        .await;

    assert!(auth.sign_in_with_federated_provider().await.is_success());
    let mut states = auth.on_auth_state_change();
    assert!(states.next().await.unwrap().signed_in);

    let outcome = auth.refresh_session().await;

    refresh.assert_async().await;
    assert_eq!(outcome.data().unwrap().uid, "uid-gh");
    let session = auth.service().session().current().unwrap();
    assert_eq!(session.id_token(), "id-token-new");
    assert_eq!(session.refresh_token(), "refresh-new");
    assert_eq!(states.next().await.unwrap().user.unwrap().uid, "uid-gh");
}

#[tokio::test]
async fn test_refresh_without_session_fails() {
    let auth = memory_facade();
    assert_eq!(auth.refresh_session().await.error(), Some("No user is signed in"));
}

#[tokio::test]
async fn test_memory_sign_up_validation_messages() {
    let auth = memory_facade();

    assert_eq!(
        auth.sign_up("not-an-email", "secret123").await.error(),
        Some("INVALID_EMAIL")
    );
    assert_eq!(
        auth.sign_up("bob@example.com", "abc").await.error(),
        Some("WEAK_PASSWORD : Password should be at least 6 characters")
    );
    assert!(auth.sign_up("bob@example.com", "secret123").await.is_success());
    assert_eq!(
        auth.sign_up("Bob@example.com", "secret123").await.error(),
        Some("EMAIL_EXISTS")
    );
}

#[tokio::test]
async fn test_memory_sign_in_rejects_wrong_password() {
    let auth = memory_facade();
    let created = auth.sign_up("carol@example.com", "secret123").await;
    assert!(auth.logout().await.is_success());

    assert_eq!(
        auth.sign_in("carol@example.com", "wrong-pass").await.error(),
        Some("INVALID_LOGIN_CREDENTIALS")
    );
    let signed_in = auth.sign_in("carol@example.com", "secret123").await;
    assert_eq!(
        signed_in.data().unwrap().uid,
        created.data().unwrap().uid
    );
    assert!(!signed_in.data().unwrap().is_new_user);
}

#[tokio::test]
async fn test_auth_state_follows_sign_in_and_logout() {
    let auth = memory_facade();
    let mut states = auth.on_auth_state_change();

    assert_eq!(states.next().await, Some(AuthState::from(None)));

    let user = auth
        .sign_up("dave@example.com", "secret123")
        .await
        .into_data()
        .unwrap();
    let state = states.next().await.unwrap();
    assert!(state.signed_in);
    assert_eq!(state.user.as_ref().map(|u| u.uid.as_str()), Some(user.uid.as_str()));

    assert!(auth.logout().await.is_success());
    let state = states.next().await.unwrap();
    assert!(!state.signed_in);
    assert!(state.user.is_none());

    let signed_in = auth.sign_in("dave@example.com", "secret123").await;
    assert!(signed_in.is_success());
    let state = states.next().await.unwrap();
    assert!(state.signed_in);
    assert_eq!(state.user.unwrap().email.as_deref(), Some("dave@example.com"));
}

#[tokio::test]
async fn test_lagging_auth_subscriber_sees_every_change() {
    let auth = memory_facade();
    let mut states = auth.on_auth_state_change();

    assert!(auth.sign_up("gina@example.com", "secret123").await.is_success());
    assert!(auth.logout().await.is_success());
    assert!(auth.sign_in("gina@example.com", "secret123").await.is_success());

    let mut seen = Vec::new();
    while let Some(state) = states.try_next() {
        seen.push(state.signed_in);
    }
    assert_eq!(seen, [false, true, false, true]);
}

#[tokio::test]
async fn test_auth_subscription_starts_from_state_at_registration() {
    let auth = memory_facade();
    let mut before = auth.on_auth_state_change();
    assert!(auth.sign_up("hank@example.com", "secret123").await.is_success());
    let mut after = auth.on_auth_state_change();
    assert!(auth.logout().await.is_success());

    assert_eq!(before.try_next().map(|s| s.signed_in), Some(false));
    assert_eq!(before.try_next().map(|s| s.signed_in), Some(true));
    assert_eq!(before.try_next().map(|s| s.signed_in), Some(false));
    assert_eq!(before.try_next(), None);

    assert_eq!(after.try_next().map(|s| s.signed_in), Some(true));
    assert_eq!(after.try_next().map(|s| s.signed_in), Some(false));
    assert_eq!(after.try_next(), None);
}

#[tokio::test]
async fn test_cancelled_auth_subscription_stops_delivering() {
    let auth = memory_facade();
    let session = auth.service().session().clone();
    let mut live = auth.on_auth_state_change();
    let cancelled = auth.on_auth_state_change();
    let dropped = auth.on_auth_state_change();
    assert_eq!(session.observer_count(), 3);

    cancelled.cancel();
    drop(dropped);
    assert_eq!(session.observer_count(), 1);

    assert!(auth.sign_up("erin@example.com", "secret123").await.is_success());
    assert_eq!(live.next().await.map(|s| s.signed_in), Some(false));
    assert_eq!(live.next().await.map(|s| s.signed_in), Some(true));

    live.cancel();
    assert_eq!(session.observer_count(), 0);
    assert!(auth.logout().await.is_success());
}

#[tokio::test]
async fn test_memory_federated_sign_in() {
    let auth = memory_facade();

    let dismissed = auth.sign_in_with_federated_provider().await;
    assert_eq!(
        dismissed.error(),
        Some("The sign-in flow was cancelled by the user")
    );

    auth.service()
        .register_federated_identity("google.com", Some("frank@gmail.com"), Some("Frank"))
        .await;
    let outcome = auth.sign_in_with_federated_provider().await;
    let user = outcome.data().unwrap();
    assert_eq!(user.display_name.as_deref(), Some("Frank"));
    assert_eq!(user.provider_id, "google.com");
    assert_eq!(auth.current_user().unwrap().uid, user.uid);
}

#[test]
fn test_idp_post_body_requires_a_token() {
    let err = IdpCredential::default().post_body("google.com").unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredential(_)));

    let body = IdpCredential {
        id_token: Some("a b".to_string()),
        access_token: Some("c&d".to_string()),
    }
    .post_body("google.com")
    .unwrap();
    assert_eq!(body, "id_token=a+b&access_token=c%26d&providerId=google.com");
}

#[test]
fn test_refreshed_tokens_lose_to_a_later_sign_out() {
    let store = SessionStore::new();
    let user = UserRecord {
        uid: "uid-kim".to_string(),
        ..Default::default()
    };
    store.replace(Some(Session::new(user.clone(), "id-1", "refresh-1", 3600)));
    store.replace(None);

    let refreshed = Session::new(user, "id-2", "refresh-2", 3600);
    assert!(!store.replace_refreshed("refresh-1", refreshed));
    assert!(store.current().is_none());
}
