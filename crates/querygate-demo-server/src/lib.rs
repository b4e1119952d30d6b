//! querygate demo server
//!
//! A stand-in managed server. It reads its launch environment
//! (`QUERYGATE_*`), binds the port it is given, answers `/health`, and serves
//! a few canned query endpoints plus an endless event stream so proxying and
//! forced shutdown can be exercised end to end.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use querygate_core::{mask_account_id, ENV_PREFIX};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Largest page `/testsummaries` hands out
const MAX_PAGE_SIZE: usize = 100;
const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DemoError {
    #[error("Missing environment variable {0}")]
    MissingVar(String),

    #[error("Invalid port '{0}'")]
    InvalidPort(String),
}

/// Launch environment as rendered by the gateway's environment bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DemoEnv {
    pub role: String,
    pub port: u16,
    pub account_id: String,
    pub account_degraded: bool,
    pub console: String,
    pub secret_provider: Option<String>,
    pub secret_parameter: Option<String>,
    /// Lower-cased backend name to URL
    pub backends: BTreeMap<String, String>,
}

impl DemoEnv {
    pub fn from_env() -> Result<Self, DemoError> {
        Self::from_vars(std::env::vars())
    }

    /// Parse `QUERYGATE_*` variables; others are ignored.
    ///
    /// `QUERYGATE_PORT` is required. The role defaults to `demo`, the
    /// account to empty.
    pub fn from_vars<I>(vars: I) -> Result<Self, DemoError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut values = BTreeMap::new();
        let mut backends = BTreeMap::new();
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if let Some(name) = suffix
                .strip_prefix("BACKEND_")
                .and_then(|rest| rest.strip_suffix("_URL"))
            {
                backends.insert(name.to_ascii_lowercase(), value);
            } else {
                values.insert(suffix.to_string(), value);
            }
        }

        let port_var = format!("{}PORT", ENV_PREFIX);
        let port = values
            .get("PORT")
            .ok_or(DemoError::MissingVar(port_var))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| DemoError::InvalidPort(port.clone()))?;

        Ok(Self {
            role: values
                .get("SERVER_NAME")
                .cloned()
                .unwrap_or_else(|| "demo".to_string()),
            port,
            account_id: values.get("ACCOUNT_ID").cloned().unwrap_or_default(),
            account_degraded: values
                .get("ACCOUNT_DEGRADED")
                .map(|v| v == "true")
                .unwrap_or(false),
            console: values
                .get("CONSOLE")
                .cloned()
                .unwrap_or_else(|| "default".to_string()),
            secret_provider: values.get("SECRET_PROVIDER").cloned(),
            secret_parameter: values.get("SECRET_PARAMETER").cloned(),
            backends,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct TestSummary {
    id: usize,
    name: String,
    account: String,
}

async fn info(State(env): State<Arc<DemoEnv>>) -> Json<Value> {
    Json(json!({
        "role": env.role,
        "port": env.port,
        "account_id": mask_account_id(&env.account_id),
        "account_degraded": env.account_degraded,
        "console": env.console,
        "secret": {
            "provider": env.secret_provider,
            "parameter": env.secret_parameter,
        },
        "backends": env.backends.keys().collect::<Vec<_>>(),
    }))
}

async fn testsummaries(
    State(env): State<Arc<DemoEnv>>,
    Query(page): Query<PageQuery>,
) -> Json<Value> {
    let size = page.size.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let account = mask_account_id(&env.account_id);
    let items: Vec<TestSummary> = (1..=size)
        .map(|id| TestSummary {
            id,
            name: format!("{}-summary-{}", env.role, id),
            account: account.clone(),
        })
        .collect();
    Json(json!({ "role": env.role, "size": size, "items": items }))
}

async fn events(
    State(env): State<Arc<DemoEnv>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let role = env.role.clone();
    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(Duration::from_millis(500));
        let mut seq = 0u64;
        loop {
            ticker.tick().await;
            let data = json!({ "role": role, "seq": seq }).to_string();
            yield Ok(Event::default().event("tick").data(data));
            seq += 1;
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn echo(body: String) -> String {
    body
}

/// Router served by the demo server
pub fn create_router(env: Arc<DemoEnv>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/info", get(info))
        .route("/testsummaries", get(testsummaries))
        .route("/events", get(events))
        .route("/echo", post(echo))
        .with_state(env)
}
