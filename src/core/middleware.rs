use crate::auth::identity_toolkit::TokenRefresher;
use crate::auth::session::SessionStore;
use http::Extensions;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};

/// Appends the project's web API key as the `key` query parameter.
#[derive(Clone)]
pub struct ApiKeyMiddleware {
    api_key: String,
}

impl ApiKeyMiddleware {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for ApiKeyMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if !self.api_key.is_empty() {
            req.url_mut()
                .query_pairs_mut()
                .append_pair("key", &self.api_key);
        }

        next.run(req, extensions).await
    }
}

/// Sends the signed-in user's ID token as a bearer token. Requests go out
/// unauthenticated while nobody is signed in.
///
/// With a [`TokenRefresher`] installed, an expired ID token is refreshed
/// before the request is sent.
#[derive(Clone)]
pub struct SessionTokenMiddleware {
    session: SessionStore,
    refresher: Option<TokenRefresher>,
}

impl SessionTokenMiddleware {
    pub fn new(session: SessionStore) -> Self {
        Self {
            session,
            refresher: None,
        }
    }

    pub fn with_refresher(mut self, refresher: TokenRefresher) -> Self {
        self.refresher = Some(refresher);
        self
    }
}

#[async_trait::async_trait]
impl Middleware for SessionTokenMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let session = match &self.refresher {
            Some(refresher) => refresher.fresh_session().await.map_err(|e| {
                reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                    "Failed to refresh ID token: {}",
                    e
                ))
            })?,
            None => self.session.current(),
        };

        if let Some(session) = session {
            let bearer = format!("Bearer {}", session.id_token());
            let value = header::HeaderValue::from_str(&bearer).map_err(|e| {
                reqwest_middleware::Error::Middleware(anyhow::anyhow!(
                    "Failed to build authorization header: {}",
                    e
                ))
            })?;
            req.headers_mut().insert(header::AUTHORIZATION, value);
        }

        next.run(req, extensions).await
    }
}
