// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Catalog REST API integration
//!
//! The session and catalog layers talk to the remote service through two
//! collaborator traits, [`AuthService`] and [`CatalogApi`]. [`ApiClient`]
//! implements both over HTTPS with reqwest.
//!
//! # Example
//!
//! ```no_run
//! use catalock::api::{ApiClient, CatalogApi};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = ApiClient::new("https://dummyjson.com")?;
//! let categories = client.categories().await?;
//! println!("{} categories", categories.len());
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{ApiError, LoginError};
use crate::types::{AuthUser, Category, DeletedProduct, Product, ProductPage};
use crate::utils::{redact_secrets, truncate};

/// Default API endpoint.
pub const DEFAULT_API_URL: &str = "https://dummyjson.com";

/// Default timeout for API requests (in seconds).
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum attempts for idempotent reads.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Maximum delay for exponential backoff (milliseconds).
const RETRY_MAX_DELAY_MS: u64 = 10000;

/// Longest error body kept in an error message.
const ERROR_BODY_PREVIEW: usize = 200;

/// Remote authentication collaborator.
#[async_trait]
pub trait AuthService: Send + Sync {
    /// Exchange credentials for a user record carrying an access token.
    async fn login(&self, username: &str, password: &str) -> Result<AuthUser, LoginError>;

    /// Check that `token` is still accepted by the server.
    async fn validate(&self, token: &str) -> Result<(), ApiError>;
}

/// Remote catalog collaborator.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn products(&self) -> Result<Vec<Product>, ApiError>;
    async fn products_by_category(&self, slug: &str) -> Result<Vec<Product>, ApiError>;
    async fn categories(&self) -> Result<Vec<Category>, ApiError>;
    async fn delete_product(&self, id: u64) -> Result<DeletedProduct, ApiError>;
}

/// Supplies the bearer token for outgoing requests.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Client for the catalog REST API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
    token_source: Option<Arc<dyn TokenSource>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("has_token_source", &self.token_source.is_some())
            .finish()
    }
}

impl ApiClient {
    /// Create a client for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("catalock/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client (TLS initialization failed)")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            token_source: None,
        })
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach the bearer token of `source` to every request when present.
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token_source.as_ref().and_then(|s| s.bearer_token()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// GET with retry and exponential backoff on transient failures.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay_ms(attempt);
                tracing::debug!(target: "api", path, "Retry attempt {} after {}ms delay", attempt + 1, delay);
                sleep(Duration::from_millis(delay)).await;
            }

            let request = self.authorize(self.client.get(&url)).timeout(self.timeout);
            let result = match request.send().await {
                Ok(response) => decode(response).await,
                Err(e) => Err(network_error(&e)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    tracing::warn!(target: "api", path, "Transient API failure: {}", err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or_else(|| ApiError::Server("Max retries exceeded".to_string())))
    }
}

/// Backoff before retry `attempt` (1-based): 500ms, 1000ms, 2000ms, ...
/// capped at 10s.
fn retry_delay_ms(attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    std::cmp::min(RETRY_BASE_DELAY_MS.saturating_mul(factor), RETRY_MAX_DELAY_MS)
}

/// Describe a transport error without leaking credentials.
fn transport_message(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "Request timed out.".to_string()
    } else if e.is_connect() {
        format!("Failed to connect: {}", redact_secrets(&e.to_string()))
    } else {
        redact_secrets(&e.to_string())
    }
}

fn network_error(e: &reqwest::Error) -> ApiError {
    ApiError::Network(transport_message(e))
}

/// Map a non-2xx status (and its body) to an [`ApiError`].
fn status_error(status: reqwest::StatusCode, body: &str) -> ApiError {
    let code = status.as_u16();
    let message = truncate(&redact_secrets(body), ERROR_BODY_PREVIEW);
    match code {
        401 | 403 => ApiError::Unauthorized,
        404 => ApiError::NotFound(message),
        429 => ApiError::RateLimited,
        500..=599 => ApiError::Server(format!("HTTP {} - {}", status, message)),
        _ => ApiError::Rejected(code, message),
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::Decode(e.to_string()))
}

/// Pull a human-readable message out of an API error body
/// (`{"message": "..."}`), falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| truncate(&redact_secrets(body), ERROR_BODY_PREVIEW))
}

#[async_trait]
impl AuthService for ApiClient {
    async fn login(&self, username: &str, password: &str) -> Result<AuthUser, LoginError> {
        let body = serde_json::json!({
            "username": username,
            "password": password,
        });

        // Not retried: a second attempt after a timeout could double-count
        // failed logins on the server.
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LoginError::NetworkFailure(transport_message(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 | 401 | 403 => LoginError::InvalidCredentials,
                _ => LoginError::ServerError(error_message(&text)),
            });
        }

        let user: AuthUser = response
            .json()
            .await
            .map_err(|e| LoginError::ServerError(format!("Unexpected login response: {}", e)))?;

        if user.access_token.as_deref().map_or(true, str::is_empty) {
            return Err(LoginError::ServerError("No token returned from server".to_string()));
        }

        Ok(user)
    }

    async fn validate(&self, token: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .get(self.url("/auth/me"))
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| network_error(&e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }
}

#[async_trait]
impl CatalogApi for ApiClient {
    async fn products(&self) -> Result<Vec<Product>, ApiError> {
        let page: ProductPage = self.get_json("/products").await?;
        Ok(page.products)
    }

    async fn products_by_category(&self, slug: &str) -> Result<Vec<Product>, ApiError> {
        let page: ProductPage = self
            .get_json(&format!("/products/category/{}", encode_segment(slug)))
            .await?;
        Ok(page.products)
    }

    async fn categories(&self) -> Result<Vec<Category>, ApiError> {
        self.get_json("/products/categories").await
    }

    async fn delete_product(&self, id: u64) -> Result<DeletedProduct, ApiError> {
        let request = self
            .authorize(self.client.delete(self.url(&format!("/products/{}", id))))
            .timeout(self.timeout);
        let response = request.send().await.map_err(|e| network_error(&e))?;
        decode(response).await
    }
}

/// Percent-encode a single path segment.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_client_configuration() {
        let client = ApiClient::new("https://dummyjson.com/").unwrap();
        assert_eq!(client.base_url(), DEFAULT_API_URL);
        assert_eq!(client.url("/products"), "https://dummyjson.com/products");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_error(StatusCode::UNAUTHORIZED, ""), ApiError::Unauthorized);
        assert_eq!(status_error(StatusCode::FORBIDDEN, ""), ApiError::Unauthorized);
        assert_eq!(status_error(StatusCode::TOO_MANY_REQUESTS, ""), ApiError::RateLimited);
        assert!(matches!(status_error(StatusCode::NOT_FOUND, "gone"), ApiError::NotFound(m) if m == "gone"));
        assert!(matches!(status_error(StatusCode::BAD_GATEWAY, ""), ApiError::Server(_)));
        assert!(matches!(status_error(StatusCode::BAD_REQUEST, "x"), ApiError::Rejected(400, _)));
    }

    #[test]
    fn test_status_error_redacts_body() {
        let err = status_error(StatusCode::BAD_REQUEST, r#"{"accessToken":"secret"}"#);
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn test_error_message_prefers_json_message() {
        assert_eq!(error_message(r#"{"message":"Invalid credentials"}"#), "Invalid credentials");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_retry_delay_starts_at_base() {
        assert_eq!(retry_delay_ms(1), RETRY_BASE_DELAY_MS);
        assert_eq!(retry_delay_ms(2), RETRY_BASE_DELAY_MS * 2);
        assert_eq!(retry_delay_ms(10), RETRY_MAX_DELAY_MS);
        assert_eq!(retry_delay_ms(80), RETRY_MAX_DELAY_MS);
    }

    #[test]
    fn test_encode_segment() {
        assert_eq!(encode_segment("mens-shirts"), "mens-shirts");
        assert_eq!(encode_segment("a b/c"), "a%20b%2Fc");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_failure() {
        // Port 9 (discard) on localhost: nothing listens in CI sandboxes.
        let client = ApiClient::new("http://127.0.0.1:9")
            .unwrap()
            .with_timeout(Duration::from_secs(2));
        let err = AuthService::login(&client, "emilys", "emilyspass").await.unwrap_err();
        assert!(matches!(err, LoginError::NetworkFailure(_)));
    }
}
