//! Upstream GET with retry and optional bearer token.
//!
//! Adapters talk to the network only through the `Fetch` trait so tests can
//! script upstream responses. `HttpClient` is the production implementation
//! on top of a blocking reqwest client.

use std::time::Duration;

use reqwest::StatusCode;

use crate::config::HttpConfig;
use crate::error::FetchError;

pub trait Fetch: Send + Sync {
    /// GETs `url` and returns the body text. 404 is reported as
    /// `FetchError::NotFound`; any other non-2xx as `FetchError::Status`.
    fn get_text(&self, url: &str, bearer: Option<&str>) -> Result<String, FetchError>;
}

pub struct HttpClient {
    client: reqwest::blocking::Client,
    retries: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    fn attempt(&self, url: &str, bearer: Option<&str>) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        response
            .text()
            .map_err(|e| FetchError::Transport(e.to_string()))
    }
}

impl Fetch for HttpClient {
    fn get_text(&self, url: &str, bearer: Option<&str>) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.attempt(url, bearer) {
                Err(e) if attempt < self.retries && is_retryable(&e) => {
                    attempt += 1;
                    tracing::debug!(%url, attempt, error = %e, "retrying upstream request");
                    std::thread::sleep(self.retry_delay);
                }
                other => return other,
            }
        }
    }
}

/// Transport failures and server-side errors may clear up; client errors
/// and 404s will not.
pub fn is_retryable(error: &FetchError) -> bool {
    match error {
        FetchError::Transport(_) => true,
        FetchError::Status(code) => *code >= 500 || *code == 429,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(is_retryable(&FetchError::Transport("timed out".into())));
        assert!(is_retryable(&FetchError::Status(503)));
        assert!(is_retryable(&FetchError::Status(429)));
        assert!(!is_retryable(&FetchError::Status(401)));
        assert!(!is_retryable(&FetchError::NotFound));
        assert!(!is_retryable(&FetchError::Malformed("x".into())));
    }

    #[test]
    fn test_client_builds_from_default_config() {
        assert!(HttpClient::new(&HttpConfig::default()).is_ok());
    }
}
