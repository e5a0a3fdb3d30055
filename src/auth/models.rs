use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const PASSWORD_PROVIDER_ID: &str = "password";

/// Identity returned by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub email_verified: bool,
    pub provider_id: String,
    /// Set when the sign-in call created the account.
    pub is_new_user: bool,
}

/// A signed-in user together with the tokens issued for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: UserRecord,
    pub(crate) id_token: String,
    pub(crate) refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user: UserRecord,
        id_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: i64,
    ) -> Self {
        Self {
            user,
            id_token: id_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: Utc::now() + Duration::seconds(expires_in_secs),
        }
    }

    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// What `on_auth_state_change` subscribers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub signed_in: bool,
    pub user: Option<UserRecord>,
}

impl From<Option<UserRecord>> for AuthState {
    fn from(user: Option<UserRecord>) -> Self {
        Self {
            signed_in: user.is_some(),
            user,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInWithIdpRequest {
    pub post_body: String,
    pub request_uri: String,
    pub return_secure_token: bool,
    pub return_idp_credential: bool,
}

/// Body returned by `accounts:signUp`, `accounts:signInWithPassword` and
/// `accounts:signInWithIdp`. The endpoints fill different subsets.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub local_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: Option<String>,
    pub registered: Option<bool>,
    pub email_verified: Option<bool>,
    pub provider_id: Option<String>,
    pub is_new_user: Option<bool>,
    pub federated_id: Option<String>,
}

impl SignInResponse {
    pub fn into_session(self, fallback_provider: &str, created: bool) -> Session {
        let expires_in = parse_expires_in(self.expires_in.as_deref());
        let user = UserRecord {
            uid: self.local_id,
            email: self.email.filter(|e| !e.is_empty()),
            display_name: self.display_name.filter(|n| !n.is_empty()),
            email_verified: self.email_verified.unwrap_or(false),
            provider_id: self
                .provider_id
                .unwrap_or_else(|| fallback_provider.to_string()),
            is_new_user: self.is_new_user.unwrap_or(created),
        };
        Session::new(user, self.id_token, self.refresh_token, expires_in)
    }
}

#[derive(Debug, Serialize)]
pub struct RefreshTokenRequest<'a> {
    pub grant_type: &'static str,
    pub refresh_token: &'a str,
}

/// Body returned by the Secure Token `token` endpoint (snake_case on the wire).
#[derive(Debug, Deserialize)]
pub struct RefreshTokenResponse {
    pub expires_in: Option<String>,
    pub token_type: Option<String>,
    pub refresh_token: String,
    pub id_token: String,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
}

/// Token lifetime in seconds; the services report it as a decimal string.
pub fn parse_expires_in(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(3600)
}
