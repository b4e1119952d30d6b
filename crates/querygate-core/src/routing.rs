//! Route table and forward-path validation.
//!
//! The first path segment of an inbound request names the managed server;
//! everything after it is the path forwarded to that server. These helpers
//! centralise the split and the traversal checks so every call site behaves
//! identically.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;

use crate::error::{GatewayError, GatewayResult};
use crate::models::ManagedServerSpec;

/// Path segments owned by the gateway itself
pub const RESERVED_NAMES: &[&str] = &["health", "status", "admin"];

/// Percent-decoding rounds applied before giving up on a path
const MAX_DECODE_ROUNDS: usize = 3;

/// Outcome of a successful route lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    /// Target server name
    pub server: &'a str,
    /// Target port
    pub port: u16,
    /// Path to request on the server, always starting with `/`
    pub forward_path: String,
}

/// Static mapping from first path segment to server port.
///
/// Built once from the managed server specs; read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteTable {
    routes: BTreeMap<String, u16>,
}

impl RouteTable {
    pub fn new(specs: &[ManagedServerSpec]) -> Self {
        let routes = specs
            .iter()
            .map(|spec| (spec.name.clone(), spec.port))
            .collect();
        Self { routes }
    }

    /// Port for a server name
    pub fn port(&self, name: &str) -> Option<u16> {
        self.routes.get(name).copied()
    }

    /// Registered server names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve an inbound request path.
    ///
    /// Unknown server names fail with [`GatewayError::UnknownServer`] before
    /// the remainder is inspected; a remainder that fails
    /// [`validate_forward_path`] fails with [`GatewayError::PathRejected`].
    pub fn resolve<'a>(&'a self, path: &str) -> GatewayResult<RouteMatch<'a>> {
        let (name, rest) = split_target(path);
        let (server, port) = self
            .routes
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), *v))
            .ok_or_else(|| GatewayError::UnknownServer(name.to_string()))?;

        validate_forward_path(rest)?;

        Ok(RouteMatch {
            server,
            port,
            forward_path: format!("/{}", rest),
        })
    }
}

/// Split `"/server/rest..."` into `("server", "rest...")`.
///
/// Only the first `/` after the server name is consumed, so an absolute
/// escape such as `/data//etc` keeps its leading `/` in the remainder.
///
/// ```
/// # use querygate_core::routing::split_target;
/// assert_eq!(split_target("/data/testsummaries"), ("data", "testsummaries"));
/// assert_eq!(split_target("/data"), ("data", ""));
/// assert_eq!(split_target("/data//etc"), ("data", "/etc"));
/// ```
pub fn split_target(path: &str) -> (&str, &str) {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.find('/') {
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => (trimmed, ""),
    }
}

/// Check that a forward path stays inside the server's namespace.
///
/// The path is percent-decoded repeatedly (up to three rounds) and every
/// round must be free of `..` segments, backslashes, NUL bytes, encoded
/// separators and a leading `/`. A path still changing after the last round
/// is rejected as well.
pub fn validate_forward_path(rest: &str) -> GatewayResult<()> {
    let mut current = rest.to_string();
    for _ in 0..MAX_DECODE_ROUNDS {
        check_plain(&current)?;
        let decoded = percent_decode_str(&current).decode_utf8_lossy().into_owned();
        if decoded == current {
            return Ok(());
        }
        current = decoded;
    }
    check_plain(&current)?;
    if percent_decode_str(&current).decode_utf8_lossy() != current {
        return Err(GatewayError::PathRejected(format!(
            "too many encoding layers: {}",
            rest
        )));
    }
    Ok(())
}

fn check_plain(path: &str) -> GatewayResult<()> {
    if path.starts_with('/') {
        return Err(GatewayError::PathRejected(
            "absolute path escape".to_string(),
        ));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(GatewayError::PathRejected(
            "illegal character in path".to_string(),
        ));
    }
    let lowered = path.to_ascii_lowercase();
    if lowered.contains("%2f") || lowered.contains("%5c") {
        return Err(GatewayError::PathRejected(
            "encoded path separator".to_string(),
        ));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(GatewayError::PathRejected(
            "parent directory segment".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::models::Entrypoint;

    fn specs() -> Vec<ManagedServerSpec> {
        ["configuration", "data", "utilities", "playbook"]
            .iter()
            .enumerate()
            .map(|(i, name)| {
                ManagedServerSpec::with_offset(
                    *name,
                    8000,
                    i as u16 + 1,
                    Entrypoint::new("server", vec![]),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn lookup_is_stable() {
        let a = RouteTable::new(&specs());
        let b = RouteTable::new(&specs());
        for name in a.names() {
            assert_eq!(a.port(name), b.port(name));
            assert_eq!(a.port(name), a.port(name));
        }
        assert_eq!(a.port("data"), Some(8002));
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn resolve_forwards_remainder() {
        let table = RouteTable::new(&specs());
        let route = table.resolve("/data/testsummaries").unwrap();
        assert_eq!(route.server, "data");
        assert_eq!(route.port, 8002);
        assert_eq!(route.forward_path, "/testsummaries");
    }

    #[test]
    fn resolve_bare_server_forwards_root() {
        let table = RouteTable::new(&specs());
        assert_eq!(table.resolve("/playbook").unwrap().forward_path, "/");
        assert_eq!(table.resolve("/playbook/").unwrap().forward_path, "/");
    }

    #[test]
    fn unknown_server_is_reported_first() {
        let table = RouteTable::new(&specs());
        let err = table.resolve("/config/../secrets").unwrap_err();
        assert!(matches!(err, GatewayError::UnknownServer(name) if name == "config"));
    }

    #[rstest]
    #[case("../config/secrets")]
    #[case("..")]
    #[case("a/../../b")]
    #[case("..%2fconfig")]
    #[case("..%2Fconfig")]
    #[case("%2e%2e/config")]
    #[case("%2E%2E")]
    #[case("%252e%252e/config")]
    #[case("%25252e%25252e/config")]
    #[case("x%2fy")]
    #[case("/etc/passwd")]
    #[case("%2fetc/passwd")]
    #[case("a\\..\\b")]
    #[case("%5c..")]
    #[case("a%00b")]
    fn traversal_is_rejected_for_every_server(#[case] rest: &str) {
        let table = RouteTable::new(&specs());
        for name in table.names() {
            let path = format!("/{}/{}", name, rest);
            let err = table.resolve(&path).unwrap_err();
            assert!(
                matches!(err, GatewayError::PathRejected(_)),
                "{} was not rejected: {:?}",
                path,
                err
            );
        }
    }

    #[rstest]
    #[case("testsummaries")]
    #[case("tests/1234/simulations")]
    #[case("a..b/c")]
    #[case("report.tar.gz")]
    #[case("search%20term")]
    #[case("")]
    fn ordinary_paths_pass(#[case] rest: &str) {
        assert!(validate_forward_path(rest).is_ok(), "{} rejected", rest);
    }

    #[test]
    fn split_without_leading_slash() {
        assert_eq!(split_target("data/x"), ("data", "x"));
        assert_eq!(split_target("/"), ("", ""));
    }
}
