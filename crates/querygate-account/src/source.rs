//! Upstream account sources

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{AccountError, AccountResult};

/// Field read from the endpoint's JSON body by default
pub const DEFAULT_ACCOUNT_FIELD: &str = "account_id";

/// Default per-attempt timeout
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on connection setup
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// One upstream call that yields an account id
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn fetch(&self) -> AccountResult<String>;
}

/// Fetches the account id with an HTTP GET
#[derive(Debug, Clone)]
pub struct HttpAccountSource {
    client: Client,
    url: Url,
    field: String,
    timeout: Duration,
}

impl HttpAccountSource {
    /// Create a source reading [`DEFAULT_ACCOUNT_FIELD`] from `url`
    pub fn new(url: &str) -> AccountResult<Self> {
        Self::with_config(url, DEFAULT_ACCOUNT_FIELD, DEFAULT_ATTEMPT_TIMEOUT)
    }

    /// Create a source with a custom field and per-attempt timeout.
    ///
    /// `field` is either a top-level key or, when it starts with `/`, a JSON
    /// pointer such as `/data/account/id`.
    pub fn with_config(url: &str, field: &str, timeout: Duration) -> AccountResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(DEFAULT_CONNECT_TIMEOUT))
            .build()?;

        Ok(Self {
            client,
            url: Url::parse(url)?,
            field: field.to_string(),
            timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl AccountSource for HttpAccountSource {
    async fn fetch(&self) -> AccountResult<String> {
        debug!(url = %self.url, "Fetching account id");

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| AccountError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AccountError::Status {
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AccountError::Timeout(self.timeout)
            } else {
                AccountError::ParseError(e.to_string())
            }
        })?;

        extract_account_id(&body, &self.field)
    }
}

/// Pull the account id out of a JSON document.
///
/// Strings are trimmed; integers are rendered in decimal. Anything else,
/// including an empty string, is a [`AccountError::MissingField`].
pub fn extract_account_id(body: &Value, field: &str) -> AccountResult<String> {
    let value = if field.starts_with('/') {
        body.pointer(field)
    } else {
        body.get(field)
    };

    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) if n.is_u64() || n.is_i64() => Ok(n.to_string()),
        _ => Err(AccountError::MissingField(field.to_string())),
    }
}
