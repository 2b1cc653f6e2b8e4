//! Baidu image-process `colourize` client.
//!
//! Baidu authenticates with an OAuth client-credentials token that lives for
//! about 30 days. The token is cached behind a `tokio::sync::Mutex` and
//! refreshed 60 s before it expires, or immediately when the API reports it
//! invalid (error codes 110/111).

use crate::config::ServiceConfig;
use crate::error::BeautifyError;
use crate::store::preview_body;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Seconds shaved off a token's lifetime before it is considered stale.
const TOKEN_REFRESH_MARGIN_SECS: u64 = 60;

/// Baidu error codes meaning "access token invalid or expired".
const TOKEN_ERROR_CODES: [i64; 2] = [110, 111];

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct ColourizeResponse {
    image: Option<String>,
    error_code: Option<i64>,
    error_msg: Option<String>,
}

/// Client for the Baidu colorization endpoint. Cheap to clone; clones share
/// one token cache.
#[derive(Clone)]
pub struct ColorizeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl ColorizeClient {
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, BeautifyError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BeautifyError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            token: Arc::new(Mutex::new(None)),
        })
    }

    /// Build a client from configuration, or `None` without Baidu credentials.
    pub fn from_config(config: &ServiceConfig) -> Result<Option<Self>, BeautifyError> {
        match (&config.baidu_api_key, &config.baidu_secret_key) {
            (Some(k), Some(s)) => Ok(Some(Self::new(
                k,
                s,
                &config.baidu_base_url,
                config.api_timeout_secs,
            )?)),
            _ => Ok(None),
        }
    }

    /// Return a valid access token, fetching a new one when needed.
    async fn access_token(&self) -> Result<String, BeautifyError> {
        let mut guard = self.token.lock().await;
        if let Some(t) = guard.as_ref() {
            if Instant::now() < t.expires_at {
                return Ok(t.value.clone());
            }
            debug!("Baidu token expired; refreshing");
        }

        let url = format!("{}/oauth/2.0/token", self.base_url);
        let resp = self
            .http
            .post(&url)
            .query(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.api_key.as_str()),
                ("client_secret", self.secret_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BeautifyError::Colorize {
                status: e.status().map(|s| s.as_u16()),
                message: format!("token request failed: {e}"),
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let parsed: TokenResponse = serde_json::from_str(&text).map_err(|_| BeautifyError::Colorize {
            status: Some(status.as_u16()),
            message: format!("unexpected token response: {}", preview_body(&text)),
        })?;

        let value = match parsed.access_token {
            Some(v) if status.is_success() => v,
            _ => {
                let msg = parsed
                    .error_description
                    .or(parsed.error)
                    .unwrap_or_else(|| "no access_token in response".to_string());
                return Err(BeautifyError::Colorize {
                    status: Some(status.as_u16()),
                    message: format!("token request rejected: {msg}"),
                });
            }
        };

        let ttl = parsed.expires_in.saturating_sub(TOKEN_REFRESH_MARGIN_SECS);
        info!("Obtained Baidu access token (valid {}s)", ttl);
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Colorize a base64-encoded image and return the colorized base64 image.
    ///
    /// The input must be the raw base64 payload (no `data:` prefix).
    pub async fn colorize_base64(&self, image_b64: &str) -> Result<String, BeautifyError> {
        match self.colorize_once(image_b64).await {
            Err(ColorizeAttempt::TokenRejected(msg)) => {
                warn!("Baidu rejected the cached token ({}); retrying with a fresh one", msg);
                self.invalidate_token().await;
                self.colorize_once(image_b64).await.map_err(ColorizeAttempt::into_error)
            }
            other => other.map_err(ColorizeAttempt::into_error),
        }
    }

    async fn colorize_once(&self, image_b64: &str) -> Result<String, ColorizeAttempt> {
        let token = self.access_token().await.map_err(ColorizeAttempt::Failed)?;
        let url = format!("{}/rest/2.0/image-process/v1/colourize", self.base_url);

        let resp = self
            .http
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .form(&[("image", image_b64)])
            .send()
            .await
            .map_err(|e| {
                ColorizeAttempt::Failed(BeautifyError::Colorize {
                    status: e.status().map(|s| s.as_u16()),
                    message: e.to_string(),
                })
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let parsed: ColourizeResponse = serde_json::from_str(&text).map_err(|_| {
            ColorizeAttempt::Failed(BeautifyError::Colorize {
                status: Some(status.as_u16()),
                message: format!("unexpected response: {}", preview_body(&text)),
            })
        })?;

        if let Some(code) = parsed.error_code {
            let msg = parsed.error_msg.unwrap_or_default();
            if TOKEN_ERROR_CODES.contains(&code) {
                return Err(ColorizeAttempt::TokenRejected(msg));
            }
            return Err(ColorizeAttempt::Failed(BeautifyError::Colorize {
                status: Some(status.as_u16()),
                message: format!("error {code}: {msg}"),
            }));
        }

        match parsed.image {
            Some(img) if status.is_success() && !img.is_empty() => Ok(img),
            _ => Err(ColorizeAttempt::Failed(BeautifyError::Colorize {
                status: Some(status.as_u16()),
                message: "response contained no image".into(),
            })),
        }
    }
}

enum ColorizeAttempt {
    TokenRejected(String),
    Failed(BeautifyError),
}

impl ColorizeAttempt {
    fn into_error(self) -> BeautifyError {
        match self {
            ColorizeAttempt::TokenRejected(msg) => BeautifyError::Colorize {
                status: None,
                message: format!("access token rejected: {msg}"),
            },
            ColorizeAttempt::Failed(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn token_mock(server: &mut Server, hits: usize) -> mockito::Mock {
        server
            .mock("POST", "/oauth/2.0/token")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
                Matcher::UrlEncoded("client_id".into(), "ak".into()),
                Matcher::UrlEncoded("client_secret".into(), "sk".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"access_token":"tok-1","expires_in":2592000}"#)
            .expect(hits)
    }

    #[tokio::test]
    async fn token_is_cached_between_calls() {
        let mut server = Server::new_async().await;
        let tok = token_mock(&mut server, 1).create_async().await;
        let col = server
            .mock("POST", "/rest/2.0/image-process/v1/colourize")
            .match_query(Matcher::UrlEncoded("access_token".into(), "tok-1".into()))
            .match_body(Matcher::UrlEncoded("image".into(), "aGVsbG8=".into()))
            .with_status(200)
            .with_body(r#"{"log_id":1,"image":"Y29sb3Vy"}"#)
            .expect(2)
            .create_async()
            .await;

        let client = ColorizeClient::new("ak", "sk", server.url(), 5).unwrap();
        assert_eq!(client.colorize_base64("aGVsbG8=").await.unwrap(), "Y29sb3Vy");
        assert_eq!(client.colorize_base64("aGVsbG8=").await.unwrap(), "Y29sb3Vy");

        tok.assert_async().await;
        col.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_is_reported() {
        let mut server = Server::new_async().await;
        let _tok = token_mock(&mut server, 1).create_async().await;
        let _col = server
            .mock("POST", "/rest/2.0/image-process/v1/colourize")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error_code":216201,"error_msg":"image format error"}"#)
            .create_async()
            .await;

        let client = ColorizeClient::new("ak", "sk", server.url(), 5).unwrap();
        let err = client.colorize_base64("eA==").await.unwrap_err();
        assert!(err.to_string().contains("image format error"), "got: {err}");
    }

    #[tokio::test]
    async fn rejected_token_is_refreshed_once() {
        let mut server = Server::new_async().await;
        let tok = token_mock(&mut server, 2).create_async().await;
        let col = server
            .mock("POST", "/rest/2.0/image-process/v1/colourize")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error_code":110,"error_msg":"Access token invalid or no longer valid"}"#)
            .expect(2)
            .create_async()
            .await;

        let client = ColorizeClient::new("ak", "sk", server.url(), 5).unwrap();
        let err = client.colorize_base64("eA==").await.unwrap_err();
        assert!(err.to_string().contains("access token rejected"));
        tok.assert_async().await;
        col.assert_async().await;
    }

    #[tokio::test]
    async fn bad_credentials_fail_token_request() {
        let mut server = Server::new_async().await;
        let _tok = server
            .mock("POST", "/oauth/2.0/token")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"error":"invalid_client","error_description":"unknown client id"}"#)
            .create_async()
            .await;

        let client = ColorizeClient::new("ak", "sk", server.url(), 5).unwrap();
        let err = client.colorize_base64("eA==").await.unwrap_err();
        assert!(err.to_string().contains("unknown client id"));
    }

    #[test]
    fn from_config_requires_both_keys() {
        let c = ServiceConfig::default();
        assert!(ColorizeClient::from_config(&c).unwrap().is_none());
        let c = ServiceConfig::builder().baidu("ak", "sk").build().unwrap();
        assert!(ColorizeClient::from_config(&c).unwrap().is_some());
    }
}
