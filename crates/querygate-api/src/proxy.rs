//! Request forwarding to managed servers
//!
//! The [`Forwarder`] relays one inbound request to `127.0.0.1:<port>` and
//! relays the answer back. The request budget bounds the wait for the
//! response head of every request except protocol upgrades, and also the
//! buffered body of ordinary responses. Event-stream bodies and upgraded
//! connections are relayed as they are produced with no timeout; they end
//! when either side closes the connection.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use querygate_core::{GatewayError, GatewayResult};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Headers that only describe the client-facing connection
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

const EVENT_STREAM: &str = "text/event-stream";

/// Forwarding settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardConfig {
    /// Budget for the response head, and for the body unless it is an event stream
    pub request_timeout: Duration,
    /// Bound on establishing the upstream connection
    pub connect_timeout: Duration,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

/// HTTP forwarder for managed servers on the loopback interface
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    config: ForwardConfig,
}

impl Forwarder {
    pub fn new(config: ForwardConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("forwarding client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ForwardConfig {
        &self.config
    }

    /// Forward `req` to `127.0.0.1:<port><forward_path>`, keeping its query.
    pub async fn forward(
        &self,
        port: u16,
        forward_path: &str,
        mut req: Request,
    ) -> GatewayResult<Response> {
        let upgrade = is_upgrade_request(req.headers());
        let client_upgrade = if upgrade {
            Some(hyper::upgrade::on(&mut req))
        } else {
            None
        };
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());

        let (parts, body) = req.into_parts();
        let url = match parts.uri.query() {
            Some(query) => format!("http://127.0.0.1:{}{}?{}", port, forward_path, query),
            None => format!("http://127.0.0.1:{}{}", port, forward_path),
        };

        let mut upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(upstream_request_headers(&parts.headers, peer, upgrade));
        if has_body(&parts.headers) {
            upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        debug!(
            method = %parts.method,
            %url,
            upgrade,
            event_stream = accepts_event_stream(&parts.headers),
            "Forwarding request"
        );

        // Response headers are bounded for every request but upgrades
        let budget = self.config.request_timeout;
        let started = Instant::now();
        let response = if upgrade {
            upstream.send().await.map_err(|e| upstream_error(e, budget))?
        } else {
            tokio::time::timeout(budget, upstream.send())
                .await
                .map_err(|_| GatewayError::UpstreamTimeout(budget))?
                .map_err(|e| upstream_error(e, budget))?
        };

        let status = response.status();
        if status == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                return tunnel(response, client_upgrade).await;
            }
        }

        let headers = downstream_response_headers(response.headers(), false);
        let body = if upgrade || is_event_stream(response.headers()) {
            trace!(%url, "Relaying response as stream");
            Body::from_stream(response.bytes_stream())
        } else {
            let remaining = budget.saturating_sub(started.elapsed());
            let bytes = tokio::time::timeout(remaining, response.bytes())
                .await
                .map_err(|_| GatewayError::UpstreamTimeout(budget))?
                .map_err(|e| upstream_error(e, budget))?;
            Body::from(bytes)
        };

        Ok(build_response(status, headers, body))
    }
}

/// Splice the client and upstream connections once both sides switched
async fn tunnel(
    response: reqwest::Response,
    client_upgrade: OnUpgrade,
) -> GatewayResult<Response> {
    let headers = downstream_response_headers(response.headers(), true);
    let mut upstream_io = response
        .upgrade()
        .await
        .map_err(|e| GatewayError::Upstream(format!("upgrade: {}", e)))?;

    tokio::spawn(async move {
        let upgraded = match client_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                debug!(error = %e, "Client upgrade failed");
                return;
            }
        };
        let mut client_io = TokioIo::new(upgraded);
        match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
            Ok((sent, received)) => debug!(sent, received, "Upgraded connection closed"),
            Err(e) => debug!(error = %e, "Upgraded connection ended with error"),
        }
    });

    Ok(build_response(
        StatusCode::SWITCHING_PROTOCOLS,
        headers,
        Body::empty(),
    ))
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn upstream_error(err: reqwest::Error, budget: Duration) -> GatewayError {
    if err.is_timeout() {
        GatewayError::UpstreamTimeout(budget)
    } else if err.is_connect() {
        GatewayError::UpstreamConnect(err.to_string())
    } else {
        GatewayError::Upstream(err.to_string())
    }
}

/// `Connection: upgrade` together with an `Upgrade` header
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    connection_tokens(headers).any(|token| token == "upgrade")
        && headers.contains_key(header::UPGRADE)
}

/// Client asked for `text/event-stream`
pub fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains(EVENT_STREAM))
}

/// Response body is an event stream
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase().starts_with(EVENT_STREAM))
        .unwrap_or(false)
}

fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|len| len > 0)
        .unwrap_or(false)
}

fn connection_tokens(headers: &HeaderMap) -> impl Iterator<Item = String> + '_ {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
}

/// Copy `headers` without hop-by-hop entries.
///
/// Headers named in `Connection` are hop-by-hop too. With `keep_upgrade`
/// the `connection` and `upgrade` headers survive.
fn strip_hop_by_hop(headers: &HeaderMap, keep_upgrade: bool) -> HeaderMap {
    let listed: Vec<String> = connection_tokens(headers).collect();
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        let upgrade_header = lower == "connection" || lower == "upgrade";
        if keep_upgrade && upgrade_header {
            out.append(name.clone(), value.clone());
            continue;
        }
        if HOP_BY_HOP.contains(&lower) || listed.iter().any(|l| l == lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers sent to the managed server.
///
/// `host` is dropped so the client sets the upstream authority. The
/// client-supplied `x-forwarded-*` headers are preserved; the peer address
/// is appended to `x-forwarded-for`.
pub fn upstream_request_headers(
    incoming: &HeaderMap,
    peer: Option<IpAddr>,
    upgrade: bool,
) -> HeaderMap {
    let mut headers = strip_hop_by_hop(incoming, upgrade);
    headers.remove(header::HOST);

    if !headers.contains_key(&X_FORWARDED_HOST) {
        if let Some(host) = incoming.get(header::HOST) {
            headers.insert(X_FORWARDED_HOST, host.clone());
        }
    }
    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
    if let Some(ip) = peer {
        let ip = ip.to_string();
        let mut hops: Vec<&str> = incoming
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        hops.push(&ip);
        let chain = hops.join(", ");
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    headers
}

/// Headers relayed back to the client
pub fn downstream_response_headers(upstream: &HeaderMap, upgrade: bool) -> HeaderMap {
    strip_hop_by_hop(upstream, upgrade)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use pretty_assertions::assert_eq;

    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn peer() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    }

    #[test]
    fn test_hop_by_hop_headers_are_stripped() {
        let incoming = headers(&[
            ("host", "gateway.local:8000"),
            ("connection", "keep-alive, x-trace-hop"),
            ("keep-alive", "timeout=5"),
            ("x-trace-hop", "1"),
            ("te", "trailers"),
            ("authorization", "Bearer abc"),
            ("accept", "application/json"),
        ]);

        let out = upstream_request_headers(&incoming, None, false);
        assert!(out.get("connection").is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("x-trace-hop").is_none());
        assert!(out.get("te").is_none());
        assert!(out.get("host").is_none());
        assert_eq!(out["authorization"], "Bearer abc");
        assert_eq!(out["accept"], "application/json");
    }

    #[test]
    fn test_forwarding_headers_added_when_absent() {
        let incoming = headers(&[("host", "gateway.local:8000")]);

        let out = upstream_request_headers(&incoming, peer(), false);
        assert_eq!(out["x-forwarded-host"], "gateway.local:8000");
        assert_eq!(out["x-forwarded-proto"], "http");
        assert_eq!(out["x-forwarded-for"], "10.0.0.7");
    }

    #[test]
    fn test_client_forwarding_headers_preserved() {
        let incoming = headers(&[
            ("host", "gateway.local:8000"),
            ("x-forwarded-for", "203.0.113.9"),
            ("x-forwarded-host", "public.example.com"),
            ("x-forwarded-proto", "https"),
        ]);

        let out = upstream_request_headers(&incoming, peer(), false);
        assert_eq!(out["x-forwarded-for"], "203.0.113.9, 10.0.0.7");
        assert_eq!(out["x-forwarded-host"], "public.example.com");
        assert_eq!(out["x-forwarded-proto"], "https");
    }

    #[test]
    fn test_every_forwarded_for_line_is_kept() {
        let incoming = headers(&[
            ("host", "gateway.local:8000"),
            ("x-forwarded-for", "203.0.113.9"),
            ("x-forwarded-for", "198.51.100.4, 192.0.2.1"),
        ]);

        let out = upstream_request_headers(&incoming, peer(), false);
        let values: Vec<_> = out.get_all("x-forwarded-for").iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(
            values[0],
            "203.0.113.9, 198.51.100.4, 192.0.2.1, 10.0.0.7"
        );
    }

    #[test]
    fn test_upgrade_headers_kept_for_upgrades() {
        let incoming = headers(&[
            ("host", "gateway.local:8000"),
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
        ]);
        assert!(is_upgrade_request(&incoming));

        let out = upstream_request_headers(&incoming, None, true);
        assert_eq!(out["connection"], "Upgrade");
        assert_eq!(out["upgrade"], "websocket");

        let plain = upstream_request_headers(&incoming, None, false);
        assert!(plain.get("upgrade").is_none());
    }

    #[test]
    fn test_stream_detection() {
        assert!(accepts_event_stream(&headers(&[(
            "accept",
            "text/event-stream"
        )])));
        assert!(!accepts_event_stream(&headers(&[(
            "accept",
            "application/json"
        )])));
        assert!(is_event_stream(&headers(&[(
            "content-type",
            "text/event-stream; charset=utf-8"
        )])));
        assert!(!is_event_stream(&headers(&[(
            "content-type",
            "application/json"
        )])));
        assert!(!is_upgrade_request(&headers(&[("connection", "keep-alive")])));
    }

    #[test]
    fn test_body_detection() {
        assert!(has_body(&headers(&[("content-length", "12")])));
        assert!(has_body(&headers(&[("transfer-encoding", "chunked")])));
        assert!(!has_body(&headers(&[("content-length", "0")])));
        assert!(!has_body(&HeaderMap::new()));
    }
}
