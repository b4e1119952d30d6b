//! Router tests against real in-process managed servers
//!
//! Every test starts a supervisor with two managed servers ("data" and
//! "playbook") served by the in-process launcher on ephemeral ports, then
//! talks to the gateway either through `tower::ServiceExt::oneshot` (for raw
//! paths a URL parser would normalise) or through a real socket.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use hyper_util::rt::TokioIo;
use pretty_assertions::assert_eq;
use querygate_account::testing::{unused_port, TestServer};
use querygate_account::{AccountResolver, AccountState, HttpAccountSource, ResolverConfig};
use querygate_api::{create_router, AppState, ForwardConfig};
use querygate_core::{
    Entrypoint, EnvironmentBundle, EnvironmentComposer, ManagedServerSpec, ResolvedAccount,
    SecretRef, ServerStatus,
};
use querygate_supervisor::{
    ReadinessConfig, RunningServer, ServerLauncher, ServerSupervisor, SupervisorConfig,
    SupervisorError, SupervisorResult, TaskLauncher,
};
use rstest::rstest;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

// =============================================================================
// Fake managed servers
// =============================================================================

#[derive(Clone)]
struct Upstream {
    name: String,
    account_id: String,
    hits: Arc<AtomicUsize>,
}

async fn testsummaries(
    State(upstream): State<Upstream>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    upstream.hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "server": upstream.name,
        "size": query.get("size"),
        "items": [{"id": 1}],
    }))
}

async fn whoami(State(upstream): State<Upstream>) -> String {
    upstream.account_id
}

async fn echo(body: String) -> String {
    body
}

async fn forwarded_headers(headers: HeaderMap) -> Json<Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "host": header("host"),
        "x-forwarded-for": header("x-forwarded-for"),
        "x-forwarded-host": header("x-forwarded-host"),
        "x-forwarded-proto": header("x-forwarded-proto"),
    }))
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(2)).await;
    "late"
}

/// Never answers
async fn hang() -> &'static str {
    std::future::pending::<()>().await;
    "unreachable"
}

async fn events() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let mut n = 0u64;
        loop {
            yield Ok(Event::default().data(format!("tick {}", n)));
            n += 1;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Switches to an echo protocol
async fn tunnel(mut req: Request) -> Response {
    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let Ok(upgraded) = on_upgrade.await else {
            return;
        };
        let mut io = TokioIo::new(upgraded);
        let mut buf = [0u8; 256];
        loop {
            match io.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if io.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("connection", "upgrade")
        .header("upgrade", "echo")
        .body(Body::empty())
        .unwrap()
}

fn upstream_router(
    spec: &ManagedServerSpec,
    bundle: &EnvironmentBundle,
    hits: Arc<AtomicUsize>,
) -> Router {
    let fallback_hits = hits.clone();
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/testsummaries", get(testsummaries))
        .route("/whoami", get(whoami))
        .route("/echo", post(echo))
        .route("/headers", get(forwarded_headers))
        .route("/slow", get(slow))
        .route("/hang", get(hang))
        .route("/events", get(events))
        .route("/tunnel", get(tunnel))
        .fallback(move || {
            let hits = fallback_hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        })
        .with_state(Upstream {
            name: spec.name.clone(),
            account_id: bundle.account.account_id.clone(),
            hits,
        })
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    supervisor: Arc<ServerSupervisor>,
    accounts: Arc<AccountState>,
    composer: Arc<EnvironmentComposer>,
    hits: Arc<AtomicUsize>,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(ResolvedAccount::live("1234567890", 1)).await
    }

    async fn start_with(account: ResolvedAccount) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let launcher_hits = hits.clone();
        let launcher = TaskLauncher::new(move |spec, bundle| {
            upstream_router(spec, bundle, launcher_hits.clone())
        });
        let harness = Self::unstarted(Arc::new(launcher), account, hits).await;

        let bundle = harness.bundle();
        let outcomes = harness.supervisor.start_all(bundle).await;
        assert!(outcomes.iter().all(|o| o.is_ok()), "{:?}", outcomes);
        harness
    }

    async fn unstarted(
        launcher: Arc<dyn ServerLauncher>,
        account: ResolvedAccount,
        hits: Arc<AtomicUsize>,
    ) -> Self {
        let specs = vec![
            ManagedServerSpec::new(
                "data",
                unused_port().await.unwrap(),
                Entrypoint::new("in-process", vec![]),
            ),
            ManagedServerSpec::new(
                "playbook",
                unused_port().await.unwrap(),
                Entrypoint::new("in-process", vec![]),
            ),
        ];
        let supervisor = Arc::new(ServerSupervisor::new(
            specs,
            launcher,
            SupervisorConfig {
                readiness: ReadinessConfig {
                    probe_interval: Duration::from_millis(20),
                    ..Default::default()
                },
                ..Default::default()
            },
        ));

        Self {
            supervisor,
            accounts: Arc::new(AccountState::with_account(account)),
            composer: Arc::new(EnvironmentComposer::new(
                BTreeMap::new(),
                SecretRef::default(),
            )),
            hits,
        }
    }

    fn bundle(&self) -> EnvironmentBundle {
        self.composer.compose(&self.accounts.current().unwrap())
    }

    fn state(&self, forward: ForwardConfig) -> AppState {
        AppState::new(
            self.supervisor.clone(),
            self.accounts.clone(),
            self.composer.clone(),
            forward,
        )
        .unwrap()
    }

    fn router(&self) -> Router {
        create_router(self.state(ForwardConfig::default()))
    }

    async fn serve(&self, forward: ForwardConfig) -> TestServer {
        TestServer::start(create_router(self.state(forward)))
            .await
            .unwrap()
    }
}

async fn oneshot(router: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

// =============================================================================
// Routing
// =============================================================================

#[tokio::test]
async fn test_forwards_path_and_query() {
    let harness = Harness::start().await;

    let (status, body) = oneshot(harness.router(), "GET", "/data/testsummaries?size=1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"server": "data", "size": "1", "items": [{"id": 1}]})
    );
    assert_eq!(harness.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_each_server_gets_its_own_traffic() {
    let harness = Harness::start().await;
    let router = harness.router();

    let (_, data) = oneshot(router.clone(), "GET", "/data/testsummaries").await;
    let (_, playbook) = oneshot(router, "GET", "/playbook/testsummaries").await;

    assert_eq!(data["server"], "data");
    assert_eq!(playbook["server"], "playbook");
}

#[rstest]
#[case("/data/../config/secrets")]
#[case("/data/..")]
#[case("/data/a/../../etc/passwd")]
#[case("/data/..%2fconfig%2fsecrets")]
#[case("/data/%2e%2e/config")]
#[case("/data/%252e%252e/config")]
#[case("/data/reports%5c..%5csecrets")]
#[case("/data//etc/passwd")]
#[case("/playbook/../data/testsummaries")]
#[tokio::test]
async fn test_traversal_rejected_before_forwarding(#[case] path: &str) {
    let harness = Harness::start().await;

    let (status, body) = oneshot(harness.router(), "GET", path).await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", path);
    assert_eq!(body["error"], "bad_request");
    assert_eq!(harness.hits.load(Ordering::SeqCst), 0, "{} reached upstream", path);
}

#[tokio::test]
async fn test_unknown_server_is_404() {
    let harness = Harness::start().await;

    let (status, body) = oneshot(harness.router(), "GET", "/config/secrets").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = oneshot(harness.router(), "GET", "/admin/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_server_not_running_is_503() {
    let hits = Arc::new(AtomicUsize::new(0));
    let launcher_hits = hits.clone();
    let launcher = TaskLauncher::new(move |spec, bundle| {
        upstream_router(spec, bundle, launcher_hits.clone())
    });
    let harness = Harness::unstarted(
        Arc::new(launcher),
        ResolvedAccount::live("1234567890", 1),
        hits,
    )
    .await;

    let (status, body) = oneshot(harness.router(), "GET", "/data/testsummaries").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "service_unavailable");
    assert!(body["message"].as_str().unwrap().contains("stopped"));
    assert_eq!(harness.hits.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Upstream failures
// =============================================================================

/// Serves only `/health` on the managed port; the test can pull it away
/// while the supervisor still believes the server is running.
struct DetachedLauncher {
    servers: Arc<Mutex<Vec<TestServer>>>,
}

struct Detached;

#[async_trait]
impl RunningServer for Detached {
    fn describe(&self) -> String {
        "detached".to_string()
    }
    fn request_shutdown(&mut self) {}
    async fn wait(&mut self) {}
    fn has_exited(&mut self) -> bool {
        false
    }
    async fn terminate(&mut self) {}
}

#[async_trait]
impl ServerLauncher for DetachedLauncher {
    async fn launch(
        &self,
        spec: &ManagedServerSpec,
        _bundle: &EnvironmentBundle,
    ) -> SupervisorResult<Box<dyn RunningServer>> {
        let listener = TcpListener::bind(("127.0.0.1", spec.port))
            .await
            .map_err(|e| SupervisorError::launch(&spec.name, e.to_string()))?;
        let server = TestServer::start_on(
            listener,
            Router::new().route("/health", get(|| async { "OK" })),
        )
        .await
        .map_err(|e| SupervisorError::launch(&spec.name, e.to_string()))?;
        self.servers.lock().unwrap().push(server);
        Ok(Box::new(Detached))
    }
}

#[tokio::test]
async fn test_connection_refused_is_502() {
    let servers = Arc::new(Mutex::new(Vec::new()));
    let harness = Harness::unstarted(
        Arc::new(DetachedLauncher {
            servers: servers.clone(),
        }),
        ResolvedAccount::live("1234567890", 1),
        Arc::new(AtomicUsize::new(0)),
    )
    .await;
    harness.supervisor.start_all(harness.bundle()).await;
    assert_eq!(
        harness.supervisor.status("data"),
        Some(ServerStatus::Running)
    );

    let detached: Vec<TestServer> = servers.lock().unwrap().drain(..).collect();
    for server in detached {
        server.shutdown().await;
    }

    let (status, body) = oneshot(harness.router(), "GET", "/data/testsummaries").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "bad_gateway");
}

#[tokio::test]
async fn test_slow_upstream_is_504() {
    let harness = Harness::start().await;
    let router = create_router(harness.state(ForwardConfig {
        request_timeout: Duration::from_millis(200),
        ..Default::default()
    }));

    let started = tokio::time::Instant::now();
    let (status, body) = oneshot(router, "GET", "/data/slow").await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "gateway_timeout");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_event_stream_request_without_headers_is_504() {
    let harness = Harness::start().await;
    let gateway = harness
        .serve(ForwardConfig {
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .await;

    let response = tokio::time::timeout(
        Duration::from_secs(5),
        gateway
            .client
            .get(gateway.url("/data/hang"))
            .header("accept", "text/event-stream")
            .send(),
    )
    .await
    .expect("gateway never answered")
    .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "gateway_timeout");
}

// =============================================================================
// Pass-through behaviour over a real socket
// =============================================================================

#[tokio::test]
async fn test_request_body_and_status_relayed() {
    let harness = Harness::start().await;
    let gateway = harness.serve(ForwardConfig::default()).await;

    let response = gateway
        .client
        .post(gateway.url("/data/echo"))
        .body("hello upstream")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello upstream");

    let missing = gateway
        .client
        .get(gateway.url("/data/no-such-thing"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_forwarding_headers() {
    let harness = Harness::start().await;
    let gateway = harness.serve(ForwardConfig::default()).await;

    let plain: Value = gateway
        .client
        .get(gateway.url("/data/headers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let data_port = harness.supervisor.state("data").unwrap().port;
    assert_eq!(plain["host"], format!("127.0.0.1:{}", data_port));
    assert_eq!(plain["x-forwarded-for"], "127.0.0.1");
    assert_eq!(plain["x-forwarded-host"], format!("127.0.0.1:{}", gateway.port()));
    assert_eq!(plain["x-forwarded-proto"], "http");

    let supplied: Value = gateway
        .client
        .get(gateway.url("/data/headers"))
        .header("x-forwarded-for", "203.0.113.9")
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(supplied["x-forwarded-for"], "203.0.113.9, 127.0.0.1");
    assert_eq!(supplied["x-forwarded-proto"], "https");
}

async fn read_until(response: reqwest::Response, needle: &str) -> String {
    let mut stream = response.bytes_stream();
    let mut seen = String::new();
    while let Some(chunk) = stream.next().await {
        seen.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
        if seen.contains(needle) {
            break;
        }
    }
    seen
}

#[tokio::test]
async fn test_event_stream_outlives_request_timeout() {
    let harness = Harness::start().await;
    // Far shorter than the time it takes to see six events
    let gateway = harness
        .serve(ForwardConfig {
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .await;

    for accept in [Some("text/event-stream"), None] {
        let mut request = gateway.client.get(gateway.url("/data/events"));
        if let Some(accept) = accept {
            request = request.header("accept", accept);
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let seen = tokio::time::timeout(Duration::from_secs(5), read_until(response, "tick 5"))
            .await
            .expect("event stream stalled");
        assert!(seen.contains("data: tick 0"));
        assert!(seen.contains("data: tick 5"));
    }
}

#[tokio::test]
async fn test_upgrade_is_tunnelled() {
    let harness = Harness::start().await;
    let gateway = harness.serve(ForwardConfig::default()).await;

    let exchange = async {
        let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
        stream
            .write_all(
                b"GET /data/tunnel HTTP/1.1\r\nHost: localhost\r\n\
                  Connection: Upgrade\r\nUpgrade: echo\r\n\r\n",
            )
            .await
            .unwrap();

        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            stream.read_exact(&mut byte).await.unwrap();
            head.push(byte[0]);
        }
        let head = String::from_utf8(head).unwrap();
        assert!(head.starts_with("HTTP/1.1 101"), "{}", head);
        assert!(head.to_ascii_lowercase().contains("upgrade: echo"));

        stream.write_all(b"ping").await.unwrap();
        let mut echoed = [0u8; 4];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping");
    };

    tokio::time::timeout(Duration::from_secs(5), exchange)
        .await
        .expect("tunnel stalled");
}

// =============================================================================
// Status and admin
// =============================================================================

#[tokio::test]
async fn test_status_healthy_when_everything_runs() {
    let harness = Harness::start().await;

    let (status, body) = oneshot(harness.router(), "GET", "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall"], "healthy");
    assert_eq!(body["resolver"]["account_id"], "******7890");
    assert_eq!(body["resolver"]["degraded"], false);
    let servers = body["servers"].as_array().unwrap();
    assert_eq!(servers.len(), 2);
    assert!(servers.iter().all(|s| s["status"] == "running"));
}

#[tokio::test]
async fn test_status_degraded_on_fallback_account() {
    let harness = Harness::start_with(ResolvedAccount::fallback("000000000000", 3)).await;

    let (status, body) = oneshot(harness.router(), "GET", "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall"], "degraded");
    assert_eq!(body["resolver"]["degraded"], true);
    assert_eq!(body["resolver"]["attempts"], 3);
}

#[tokio::test]
async fn test_status_degraded_when_a_server_is_down() {
    let hits = Arc::new(AtomicUsize::new(0));
    let launcher_hits = hits.clone();
    let launcher = TaskLauncher::new(move |spec, bundle| {
        upstream_router(spec, bundle, launcher_hits.clone())
    });
    let harness = Harness::unstarted(
        Arc::new(launcher),
        ResolvedAccount::live("1234567890", 1),
        hits,
    )
    .await;

    let (status, body) = oneshot(harness.router(), "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall"], "degraded");
    assert_eq!(body["resolver"]["degraded"], false);
}

#[tokio::test]
async fn test_gateway_liveness() {
    let harness = Harness::start().await;
    let response = harness
        .router()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_restart_leaves_other_servers_alone() {
    let harness = Harness::start().await;
    let playbook_before = harness.supervisor.state("playbook").unwrap();

    let (status, body) = oneshot(harness.router(), "POST", "/admin/servers/data/restart").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server"], "data");
    assert_eq!(body["status"], "running");
    assert_eq!(body["restarts"], 1);
    assert_eq!(harness.supervisor.state("playbook").unwrap(), playbook_before);

    let (status, _) = oneshot(harness.router(), "GET", "/data/testsummaries").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_restart_unknown_server() {
    let harness = Harness::start().await;
    let (status, body) = oneshot(harness.router(), "POST", "/admin/servers/nope/restart").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_admin_second_restart_is_rejected() {
    let harness = Harness::start().await;
    let gateway = harness.serve(ForwardConfig::default()).await;

    // An open event stream keeps the old instance draining for a while
    let stream = gateway
        .client
        .get(gateway.url("/data/events"))
        .send()
        .await
        .unwrap();

    let router = harness.router();
    let first = tokio::spawn(oneshot(
        router.clone(),
        "POST",
        "/admin/servers/data/restart",
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (status, body) = oneshot(router, "POST", "/admin/servers/data/restart").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (first_status, _) = first.await.unwrap();
    assert_eq!(first_status, StatusCode::OK);
    drop(stream);
}

#[tokio::test]
async fn test_admin_restart_with_reresolution() {
    let harness = Harness::start().await;
    let account_endpoint = TestServer::start(Router::new().route(
        "/account",
        get(|| async { Json(json!({"account_id": "5555666677"})) }),
    ))
    .await
    .unwrap();
    let resolver = AccountResolver::new(
        Arc::new(HttpAccountSource::new(&account_endpoint.url("/account")).unwrap()),
        ResolverConfig {
            attempts: 1,
            ..Default::default()
        },
    );
    let router = create_router(
        harness
            .state(ForwardConfig::default())
            .with_resolver(Arc::new(resolver)),
    );

    let (status, body) = oneshot(
        router.clone(),
        "POST",
        "/admin/servers/data/restart?reresolve=true",
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["account_degraded"], false);
    assert_eq!(
        harness.accounts.current().unwrap().account_id,
        "5555666677"
    );

    let response = router
        .oneshot(
            Request::builder()
                .uri("/data/whoami")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"5555666677");
}

#[tokio::test]
async fn test_reresolution_requires_a_resolver() {
    let harness = Harness::start().await;
    let (status, body) = oneshot(
        harness.router(),
        "POST",
        "/admin/servers/data/restart?reresolve=true",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    assert_eq!(
        harness.supervisor.state("data").unwrap().restarts,
        0,
        "restart must not run without a bundle"
    );
}

#[tokio::test]
async fn test_streaming_response_is_not_buffered() {
    let harness = Harness::start().await;
    let gateway = harness.serve(ForwardConfig::default()).await;

    let response = gateway
        .client
        .get(gateway.url("/data/events"))
        .header("accept", "text/event-stream")
        .send()
        .await
        .unwrap();

    // The first event arrives although the upstream body never ends
    let first = tokio::time::timeout(Duration::from_secs(2), read_until(response, "tick 0"))
        .await
        .expect("first event not relayed");
    assert!(first.contains("tick 0"));
}
