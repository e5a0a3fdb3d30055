//! Project configuration.
//!
//! [`FirebaseOptions`] has the same shape as the web configuration object
//! shown in the Firebase console, so it can be loaded straight from that JSON.
//! It can also be assembled from environment variables, including the
//! emulator host variables used by the Firebase CLI.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const IDENTITY_TOOLKIT_V1_API: &str = "https://identitytoolkit.googleapis.com/v1";
pub const SECURE_TOKEN_V1_API: &str = "https://securetoken.googleapis.com/v1";
pub const FIRESTORE_V1_API: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE_ID: &str = "(default)";

/// Errors raised while loading [`FirebaseOptions`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FirebaseOptions {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_domain: Option<String>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_id: Option<String>,
    /// Overrides the Identity Toolkit base URL (emulators, tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_toolkit_url: Option<String>,
    /// Overrides the Secure Token base URL (emulators, tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure_token_url: Option<String>,
    /// Overrides the Firestore base URL (emulators, tests).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firestore_url: Option<String>,
    /// Retries for transient transport failures. Zero disables retrying.
    #[serde(default)]
    pub max_transport_retries: u32,
}

impl FirebaseOptions {
    pub fn new(api_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    /// Parses the console's web configuration JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// Recognised variables: `FIREBASE_API_KEY`, `FIREBASE_PROJECT_ID`,
    /// `FIREBASE_APP_ID`, `FIREBASE_AUTH_DOMAIN`, `FIREBASE_DATABASE_ID`,
    /// `FIREBASE_AUTH_EMULATOR_HOST` and `FIRESTORE_EMULATOR_HOST`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut options = Self {
            api_key: value("FIREBASE_API_KEY").unwrap_or_default(),
            project_id: value("FIREBASE_PROJECT_ID").unwrap_or_default(),
            app_id: value("FIREBASE_APP_ID"),
            auth_domain: value("FIREBASE_AUTH_DOMAIN"),
            database_id: value("FIREBASE_DATABASE_ID"),
            ..Default::default()
        };

        if let Some(host) = value("FIREBASE_AUTH_EMULATOR_HOST") {
            options.identity_toolkit_url =
                Some(format!("http://{}/identitytoolkit.googleapis.com/v1", host));
            options.secure_token_url =
                Some(format!("http://{}/securetoken.googleapis.com/v1", host));
        }
        if let Some(host) = value("FIRESTORE_EMULATOR_HOST") {
            options.firestore_url = Some(format!("http://{}/v1", host));
        }

        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("apiKey"));
        }
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Missing("projectId"));
        }
        for endpoint in [
            &self.identity_toolkit_url,
            &self.secure_token_url,
            &self.firestore_url,
        ]
        .into_iter()
        .flatten()
        {
            Url::parse(endpoint).map_err(|source| ConfigError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                source,
            })?;
        }
        Ok(())
    }

    pub fn identity_toolkit_url(&self) -> &str {
        self.identity_toolkit_url
            .as_deref()
            .unwrap_or(IDENTITY_TOOLKIT_V1_API)
    }

    pub fn secure_token_url(&self) -> &str {
        self.secure_token_url.as_deref().unwrap_or(SECURE_TOKEN_V1_API)
    }

    pub fn database_id(&self) -> &str {
        self.database_id.as_deref().unwrap_or(DEFAULT_DATABASE_ID)
    }

    /// Resource name of the database, e.g. `projects/p/databases/(default)`.
    pub fn database_name(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database_id())
    }

    /// HTTP prefix of the documents resource of the database.
    pub fn documents_url(&self) -> String {
        let base = self.firestore_url.as_deref().unwrap_or(FIRESTORE_V1_API);
        format!("{}/{}/documents", base.trim_end_matches('/'), self.database_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_console_web_config() {
        let options = FirebaseOptions::from_json(
            r#"{
                "apiKey": "AIza-test",
                "authDomain": "demo.firebaseapp.com",
                "projectId": "demo",
                "storageBucket": "demo.appspot.com",
                "messagingSenderId": "123456789",
                "appId": "1:123456789:web:abcdef"
            }"#,
        )
        .unwrap();

        assert_eq!(options.api_key, "AIza-test");
        assert_eq!(options.app_id.as_deref(), Some("1:123456789:web:abcdef"));
        assert_eq!(options.max_transport_retries, 0);
        assert_eq!(
            options.documents_url(),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents"
        );
    }

    #[test]
    fn missing_project_id_is_rejected() {
        let err = FirebaseOptions::from_json(r#"{"apiKey": "k"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("projectId")));
    }

    #[test]
    fn emulator_hosts_redirect_endpoints() {
        let vars = HashMap::from([
            ("FIREBASE_API_KEY", "k"),
            ("FIREBASE_PROJECT_ID", "demo"),
            ("FIREBASE_AUTH_EMULATOR_HOST", "127.0.0.1:9099"),
            ("FIRESTORE_EMULATOR_HOST", "127.0.0.1:8080"),
        ]);
        let options =
            FirebaseOptions::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(
            options.identity_toolkit_url(),
            "http://127.0.0.1:9099/identitytoolkit.googleapis.com/v1"
        );
        assert_eq!(
            options.secure_token_url(),
            "http://127.0.0.1:9099/securetoken.googleapis.com/v1"
        );
        assert_eq!(
            options.documents_url(),
            "http://127.0.0.1:8080/v1/projects/demo/databases/(default)/documents"
        );
    }

    #[test]
    fn invalid_endpoint_override_is_rejected() {
        let mut options = FirebaseOptions::new("k", "demo");
        options.firestore_url = Some("not a url".to_string());
        assert!(matches!(
            options.validate(),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }
}
