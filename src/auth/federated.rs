//! Federated (third-party identity provider) sign-in.
//!
//! The interactive part of the flow, where the user consents at the provider,
//! happens outside this crate: a [`ConsentFlow`] implementation runs it and
//! hands back the provider's credential, which the authentication service
//! then exchanges for a session.

use super::AuthError;
use std::collections::BTreeMap;

pub const GOOGLE_PROVIDER_ID: &str = "google.com";

/// Which identity provider to use and what to ask it for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedProvider {
    pub provider_id: String,
    pub scopes: Vec<String>,
    pub custom_parameters: BTreeMap<String, String>,
}

impl FederatedProvider {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            scopes: Vec::new(),
            custom_parameters: BTreeMap::new(),
        }
    }

    pub fn google() -> Self {
        Self::new(GOOGLE_PROVIDER_ID)
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.push(scope.into());
        self
    }

    pub fn with_custom_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(key.into(), value.into());
        self
    }
}

/// Credential issued by the identity provider at the end of a consent flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdpCredential {
    pub id_token: Option<String>,
    pub access_token: Option<String>,
}

impl IdpCredential {
    pub fn from_id_token(id_token: impl Into<String>) -> Self {
        Self {
            id_token: Some(id_token.into()),
            access_token: None,
        }
    }

    pub fn from_access_token(access_token: impl Into<String>) -> Self {
        Self {
            id_token: None,
            access_token: Some(access_token.into()),
        }
    }

    /// Form-encoded `postBody` expected by `accounts:signInWithIdp`.
    pub fn post_body(&self, provider_id: &str) -> Result<String, AuthError> {
        if self.id_token.is_none() && self.access_token.is_none() {
            return Err(AuthError::InvalidCredential(
                "identity provider returned neither an ID token nor an access token".to_string(),
            ));
        }
        let mut body = url::form_urlencoded::Serializer::new(String::new());
        if let Some(token) = &self.id_token {
            body.append_pair("id_token", token);
        }
        if let Some(token) = &self.access_token {
            body.append_pair("access_token", token);
        }
        body.append_pair("providerId", provider_id);
        Ok(body.finish())
    }
}

/// Runs the provider-hosted consent step.
///
/// Implementations suspend until the user completes or abandons the flow and
/// return [`AuthError::FlowCancelled`] in the latter case.
#[async_trait::async_trait]
pub trait ConsentFlow: Send + Sync {
    async fn authorize(&self, provider: &FederatedProvider) -> Result<IdpCredential, AuthError>;
}

/// A consent flow that already happened elsewhere (a mobile client, a
/// browser front end) and produced this credential.
#[derive(Debug, Clone)]
pub struct ProvidedCredential(pub IdpCredential);

#[async_trait::async_trait]
impl ConsentFlow for ProvidedCredential {
    async fn authorize(&self, _provider: &FederatedProvider) -> Result<IdpCredential, AuthError> {
        Ok(self.0.clone())
    }
}
