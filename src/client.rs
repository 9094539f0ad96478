use anyhow::Context;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::exchange;
use crate::auth::single_flight::{RefreshCoordinator, RefreshOutcome};
use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::session::SessionStore;

/// HTTP client for the insintesi API with transparent token refresh.
///
/// Every request carries the current bearer token. A 401 triggers a single
/// refresh-and-replay cycle shared by all requests in flight; callers never
/// observe the refresh, they either get their response or a terminal error.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    http: Client,

    /// Backend base URL, no trailing slash
    base_url: String,

    /// Credential store
    session: Arc<SessionStore>,

    /// Single-flight refresh state, one cycle at a time
    coordinator: RefreshCoordinator,
}

impl ApiClient {
    /// Create a new client against `config.base_url`
    pub fn new(config: &Config, session: Arc<SessionStore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("Failed to create HTTP client")
            .map_err(ApiError::Internal)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
            coordinator: RefreshCoordinator::new(),
        })
    }

    /// Credential store backing this client
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    /// True iff an access token is currently held
    pub async fn is_authenticated(&self) -> bool {
        self.session.is_authenticated().await
    }

    /// Log in with username/password and store the returned token pair
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let tokens = exchange::login(&self.http, &self.base_url, username, password).await?;
        self.session
            .set_credentials(
                &tokens.access_token,
                tokens.refresh_token.as_deref().unwrap_or_default(),
            )
            .await?;
        tracing::info!("Logged in");
        Ok(())
    }

    /// Drop the session: empty both tokens and remove them from storage
    pub async fn logout(&self) -> Result<()> {
        self.session.clear().await?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Start building a request against `path` (e.g. `/teams`)
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
    }

    /// Build and execute a request through the pipeline
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    /// GET `path`
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(self.request(Method::GET, path)).await
    }

    /// POST `body` as JSON to `path`
    pub async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    /// DELETE `path`
    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.send(self.request(Method::DELETE, path)).await
    }

    /// Execute a request: attach the bearer token, send, and on a 401 run
    /// one shared refresh cycle and replay with the new token. A request
    /// triggers at most one refresh no matter how many cycles the process
    /// goes through.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let mut retried = false;

        let token = self.session.access_token().await;
        if !token.is_empty() {
            request.headers_mut().insert(AUTHORIZATION, bearer(&token)?);
        }

        loop {
            let req = request.try_clone().ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;

            tracing::debug!(method = %method, url = %url, retried, "Sending request");
            let response = self.http.execute(req).await?;
            let status = response.status();
            tracing::debug!(status = %status, "Received response");

            if status != StatusCode::UNAUTHORIZED {
                if status.is_success() {
                    return Ok(response);
                }
                // Non-auth errors propagate as-is and never trigger refresh
                let message = response.text().await.unwrap_or_default();
                tracing::warn!(status = status.as_u16(), url = %url, "Request failed");
                return Err(ApiError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            if retried {
                tracing::warn!(url = %url, "Still unauthorized after refresh");
                return Err(ApiError::AuthExpired);
            }
            retried = true;

            let token = self.refreshed_access_token().await?;
            request.headers_mut().insert(AUTHORIZATION, bearer(&token)?);
        }
    }

    /// Obtain a fresh access token, sharing one exchange across all callers
    /// that fault concurrently. On exchange failure the session is torn down
    /// and every affected caller gets `AuthExpired`.
    async fn refreshed_access_token(&self) -> Result<String> {
        match self
            .coordinator
            .run(|| self.exchange_refresh_token())
            .await
        {
            RefreshOutcome::Token(token) => Ok(token),
            RefreshOutcome::LeaderFailed(err) => {
                tracing::warn!(error = %err, "Token refresh failed, clearing session");
                if let Err(e) = self.session.clear().await {
                    tracing::error!(error = %e, "Failed to clear session after refresh failure");
                }
                Err(ApiError::AuthExpired)
            }
            RefreshOutcome::Cancelled => Err(ApiError::AuthExpired),
        }
    }

    /// The actual token exchange: refresh token in, new access token out.
    /// Called at most once per refresh cycle, by the cycle's leader.
    async fn exchange_refresh_token(&self) -> Result<String> {
        let refresh_token = self.session.refresh_token().await;
        if refresh_token.is_empty() {
            tracing::debug!("No refresh token held, cannot refresh");
            return Err(ApiError::AuthExpired);
        }

        let tokens = exchange::refresh(&self.http, &self.base_url, &refresh_token).await?;

        match tokens.refresh_token.as_deref() {
            // Rotated refresh token: store both
            Some(rotated) => {
                self.session
                    .set_credentials(&tokens.access_token, rotated)
                    .await?
            }
            // No rotation: keep the existing refresh token
            None => self.session.set_access_token(&tokens.access_token).await?,
        }

        tracing::info!("Access token refreshed");
        Ok(tokens.access_token)
    }
}

fn bearer(token: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {}", token))
        .context("Access token is not a valid header value")
        .map_err(ApiError::Internal)
}
