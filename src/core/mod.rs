//! Building blocks shared by the facades: the result envelope, the
//! subscription handle, the telemetry observer and the HTTP plumbing used by
//! the REST-backed services.

pub mod envelope;
pub mod middleware;
pub mod observer;
pub mod subscription;


use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use std::sync::Arc;

/// Length of identifiers generated on the client for new documents and accounts.
pub const AUTO_ID_LENGTH: usize = 20;

/// Error body shared by the Google REST APIs.
#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
    pub errors: Option<Vec<FirebaseSubError>>,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseSubError {
    pub message: String,
    pub domain: Option<String>,
    pub reason: Option<String>,
}

/// An unsuccessful HTTP exchange, reduced to its status code and the message
/// the service put in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub code: u16,
    pub message: String,
}

/// Reads an error response. The service message is kept verbatim; when the
/// body is not the standard error shape the raw text (or `default_msg`) is used.
pub async fn parse_error_response(response: reqwest::Response, default_msg: &str) -> ApiFailure {
    let code = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<FirebaseErrorResponse>(&text) {
        Ok(error_resp) if !error_resp.error.message.is_empty() => ApiFailure {
            code: error_resp.error.code,
            message: error_resp.error.message,
        },
        _ if !text.trim().is_empty() => ApiFailure {
            code,
            message: format!("{} ({}): {}", default_msg, code, text.trim()),
        },
        _ => ApiFailure {
            code,
            message: format!("{} ({})", default_msg, code),
        },
    }
}

/// Generates a random alphanumeric identifier of [`AUTO_ID_LENGTH`] characters.
pub fn auto_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Builds the HTTP client used by a REST service.
///
/// Transient failures are retried only when `max_retries` is non-zero.
pub fn build_client(
    http: Client,
    max_retries: u32,
    middleware: Vec<Arc<dyn Middleware>>,
) -> ClientWithMiddleware {
    let mut builder = ClientBuilder::new(http);
    if max_retries > 0 {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
    }
    for layer in middleware {
        builder = builder.with_arc(layer);
    }
    builder.build()
}
