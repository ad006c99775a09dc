//! Request translation.
//!
//! # Responsibilities
//! - Validate the request target
//! - Rewrite the uri, split off the query string, resolve the script path
//! - Build the CGI/1.1 environment handed to the backend
//!
//! # Design Decisions
//! - Static parameters go in first; computed values override them
//! - Absent values are omitted, never sent as empty strings
//! - `..` segments are resolved inside the document root so the script path
//!   cannot climb out of it. This differs from a plain POSIX join:
//!   `/a/../../etc/passwd` under `/var/www` gives `/var/www/etc/passwd`,
//!   not `/var/etc/passwd`
//! - The debug flag only logs the environment; it never changes it

use std::fmt;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, HeaderName, Method, Request};
use hashlink::LinkedHashMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::routing::Rewriter;

pub const SERVER_PROTOCOL: &str = "HTTP/1.1";
pub const GATEWAY_INTERFACE: &str = "CGI/1.1";
pub const REDIRECT_STATUS: &str = "200";

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Ordered CGI environment: variable name → value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: LinkedHashMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any earlier value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Set a variable only when a value is present.
    pub fn insert_some(&mut self, name: &str, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl IntoIterator for Environment {
    type Item = (String, String);
    type IntoIter = hashlink::linked_hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Serialize for Environment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.vars.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Per-request path state, refined step by step before the environment is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Current uri. Always starts with `/`.
    pub uri: String,
    /// The uri before a rewrite rule matched.
    pub outer_uri: Option<String>,
    /// Path part of the uri when it carried a query.
    pub document: Option<String>,
    /// Query part, with any further `?` turned into `&`.
    pub query: Option<String>,
    /// Resolved script path.
    pub script: Option<String>,
}

impl RequestContext {
    /// Start from the raw request target.
    pub fn new(target: &str, script: Option<String>) -> Result<Self, GatewayError> {
        check_uri(target)?;
        Ok(Self {
            uri: target.to_string(),
            outer_uri: None,
            document: None,
            query: None,
            script,
        })
    }

    /// Apply the first matching rewrite rule.
    pub fn rewrite(&mut self, rewriter: &Rewriter) -> Result<(), GatewayError> {
        if let Some(rewritten) = rewriter.rewrite(&self.uri) {
            check_uri(&rewritten.uri)?;
            self.outer_uri = Some(rewritten.outer_uri);
            self.uri = rewritten.uri;
        }
        Ok(())
    }

    /// Split `document?query` at the first `?`.
    pub fn split_query(&mut self) {
        if let Some((document, query)) = self.uri.split_once('?') {
            self.document = Some(document.to_string());
            self.query = Some(query.replace('?', "&"));
        }
    }

    /// Resolve the script under `document_root` unless one was supplied.
    pub fn resolve_script(&mut self, document_root: &str) {
        if self.script.is_none() {
            self.script = Some(join_document_path(document_root, self.document_uri()));
        }
    }

    pub fn document_uri(&self) -> &str {
        self.document.as_deref().unwrap_or(&self.uri)
    }

    pub fn request_uri(&self) -> &str {
        self.outer_uri.as_deref().unwrap_or(&self.uri)
    }

    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }
}

fn check_uri(uri: &str) -> Result<(), GatewayError> {
    if uri.starts_with('/') {
        Ok(())
    } else {
        Err(GatewayError::InvalidRequest(uri.to_string()))
    }
}

/// Join a request path onto the document root.
///
/// `..` pops at most back to the root, never above it.
fn join_document_path(root: &str, path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut joined = format!("{}/{}", root.trim_end_matches('/'), segments.join("/"));
    if path.ends_with('/') && !segments.is_empty() {
        joined.push('/');
    }
    joined
}

/// Connection-level facts about a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMeta {
    pub remote_addr: Option<SocketAddr>,
    pub server_name: Option<String>,
    pub scheme: String,
}

impl Default for ConnectionMeta {
    fn default() -> Self {
        Self {
            remote_addr: None,
            server_name: None,
            scheme: "http".to_string(),
        }
    }
}

impl ConnectionMeta {
    /// Collect connection metadata from an axum request.
    pub fn from_request<B>(request: &Request<B>, config: &GatewayConfig) -> Self {
        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        let server_name = request
            .headers()
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(strip_port)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .or_else(|| config.server_name.clone());

        let forwarded = config
            .trust_forwarded_proto
            .then(|| request.headers().get(X_FORWARDED_PROTO))
            .flatten()
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_ascii_lowercase());

        let scheme = request
            .uri()
            .scheme_str()
            .map(str::to_string)
            .or(forwarded)
            .unwrap_or_else(|| config.scheme.clone());

        Self {
            remote_addr,
            server_name,
            scheme,
        }
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    host.split(':').next().unwrap_or(host)
}

/// Builds CGI environments from HTTP requests.
#[derive(Debug, Clone)]
pub struct RequestTranslator {
    document_root: String,
    script: Option<String>,
    rewriter: Rewriter,
    params: Vec<(String, String)>,
    server_software: String,
    debug: bool,
}

impl RequestTranslator {
    /// Compile the translator from configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            document_root: config.document_root.clone(),
            script: config.script.clone(),
            rewriter: Rewriter::from_config(&config.rewrite)?,
            params: config
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            server_software: config.server_software.clone(),
            debug: config.debug,
        })
    }

    /// Validate, rewrite, split and resolve a request target.
    pub fn context(&self, target: &str) -> Result<RequestContext, GatewayError> {
        let mut context = RequestContext::new(target, self.script.clone())?;
        context.rewrite(&self.rewriter)?;
        context.split_query();
        context.resolve_script(&self.document_root);
        Ok(context)
    }

    /// Translate an axum request.
    pub fn translate_request<B>(
        &self,
        request: &Request<B>,
        conn: &ConnectionMeta,
    ) -> Result<Environment, GatewayError> {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("");
        self.translate(request.method(), target, request.headers(), conn)
    }

    /// Build the CGI environment for one request.
    pub fn translate(
        &self,
        method: &Method,
        target: &str,
        headers: &HeaderMap,
        conn: &ConnectionMeta,
    ) -> Result<Environment, GatewayError> {
        let context = self.context(target)?;
        let script = context.script().unwrap_or_default();

        let mut env = Environment::new();
        for (name, value) in &self.params {
            env.insert(name.as_str(), value.as_str());
        }

        env.insert("REQUEST_METHOD", method.as_str());
        env.insert_some("CONTENT_TYPE", header_value(headers, &header::CONTENT_TYPE));
        env.insert_some("CONTENT_LENGTH", header_value(headers, &header::CONTENT_LENGTH));
        env.insert_some(
            "CONTENT_DISPOSITION",
            header_value(headers, &header::CONTENT_DISPOSITION),
        );
        env.insert("DOCUMENT_ROOT", self.document_root.as_str());
        env.insert("SCRIPT_FILENAME", script);
        env.insert("SCRIPT_NAME", script.rsplit('/').next().unwrap_or(script));
        env.insert("REQUEST_URI", context.request_uri());
        env.insert("DOCUMENT_URI", context.document_uri());
        env.insert_some("QUERY_STRING", context.query.as_deref());
        env.insert("REQUEST_SCHEME", conn.scheme.as_str());
        if conn.scheme.eq_ignore_ascii_case("https") {
            env.insert("HTTPS", "on");
        }
        env.insert_some("REMOTE_ADDR", conn.remote_addr.map(|a| a.ip().to_canonical().to_string()));
        env.insert_some("REMOTE_PORT", conn.remote_addr.map(|a| a.port().to_string()));
        env.insert_some("SERVER_NAME", conn.server_name.as_deref());
        env.insert("SERVER_PROTOCOL", SERVER_PROTOCOL);
        env.insert("GATEWAY_INTERFACE", GATEWAY_INTERFACE);
        env.insert("SERVER_SOFTWARE", self.server_software.as_str());
        env.insert("REDIRECT_STATUS", REDIRECT_STATUS);

        for name in headers.keys() {
            if let Some(value) = header_value(headers, name) {
                env.insert(cgi_header_name(name), value);
            }
        }

        if self.debug {
            match serde_json::to_string(&env) {
                Ok(json) => tracing::info!(uri = %context.request_uri(), environment = %json, "Computed CGI environment"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize CGI environment"),
            }
        }

        Ok(env)
    }
}

/// `Accept-Language` → `HTTP_ACCEPT_LANGUAGE`.
fn cgi_header_name(name: &HeaderName) -> String {
    format!("HTTP_{}", name.as_str().to_ascii_uppercase().replace('-', "_"))
}

/// All values of a header folded into one string.
fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let separator = if *name == header::COOKIE { "; " } else { ", " };
    let values: Vec<String> = headers
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();
    (!values.is_empty()).then(|| values.join(separator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RewriteRuleConfig;
    use axum::body::Body;

    fn config() -> GatewayConfig {
        GatewayConfig {
            document_root: "/var/www".into(),
            server_software: "test-gateway".into(),
            ..GatewayConfig::default()
        }
    }

    fn translate(config: &GatewayConfig, target: &str) -> Result<Environment, GatewayError> {
        RequestTranslator::from_config(config).unwrap().translate(
            &Method::GET,
            target,
            &HeaderMap::new(),
            &ConnectionMeta::default(),
        )
    }

    #[test]
    fn test_fixed_entries_always_present() {
        let env = translate(&config(), "/index.php").unwrap();
        for key in [
            "REQUEST_METHOD",
            "DOCUMENT_ROOT",
            "SCRIPT_FILENAME",
            "SERVER_PROTOCOL",
            "GATEWAY_INTERFACE",
            "REDIRECT_STATUS",
        ] {
            assert!(env.contains(key), "missing {key}");
        }
        assert_eq!(env.get("SCRIPT_FILENAME"), Some("/var/www/index.php"));
        assert_eq!(env.get("SCRIPT_NAME"), Some("index.php"));
        assert_eq!(env.get("SERVER_PROTOCOL"), Some("HTTP/1.1"));
        assert_eq!(env.get("GATEWAY_INTERFACE"), Some("CGI/1.1"));
        assert_eq!(env.get("REDIRECT_STATUS"), Some("200"));
        assert_eq!(env.get("SERVER_SOFTWARE"), Some("test-gateway"));
    }

    #[test]
    fn test_absent_values_are_omitted() {
        let env = translate(&config(), "/index.php").unwrap();
        for key in [
            "CONTENT_TYPE",
            "CONTENT_LENGTH",
            "CONTENT_DISPOSITION",
            "QUERY_STRING",
            "HTTPS",
            "REMOTE_ADDR",
            "REMOTE_PORT",
            "SERVER_NAME",
        ] {
            assert!(!env.contains(key), "unexpected {key}");
        }
        assert_eq!(env.get("REQUEST_URI"), Some("/index.php"));
        assert_eq!(env.get("DOCUMENT_URI"), Some("/index.php"));
    }

    #[test]
    fn test_query_string_split() {
        let env = translate(&config(), "/a?x=1").unwrap();
        assert_eq!(env.get("QUERY_STRING"), Some("x=1"));
        assert_eq!(env.get("DOCUMENT_URI"), Some("/a"));
        assert_eq!(env.get("REQUEST_URI"), Some("/a?x=1"));
        assert_eq!(env.get("SCRIPT_FILENAME"), Some("/var/www/a"));
    }

    #[test]
    fn test_extra_question_marks_become_ampersands() {
        let env = translate(&config(), "/a?x=1?y=2").unwrap();
        assert_eq!(env.get("QUERY_STRING"), Some("x=1&y=2"));
        assert_eq!(env.get("DOCUMENT_URI"), Some("/a"));
    }

    #[test]
    fn test_trailing_question_mark_gives_empty_query() {
        let env = translate(&config(), "/a?").unwrap();
        assert_eq!(env.get("QUERY_STRING"), Some(""));
    }

    #[test]
    fn test_rewrite_keeps_original_request_uri() {
        let mut config = config();
        config.rewrite.push(RewriteRuleConfig::new(r"^/u/(\d+)$", "/users/$1"));

        let env = translate(&config, "/u/42").unwrap();
        assert_eq!(env.get("REQUEST_URI"), Some("/u/42"));
        assert_eq!(env.get("DOCUMENT_URI"), Some("/users/42"));
        assert_eq!(env.get("SCRIPT_FILENAME"), Some("/var/www/users/42"));
    }

    #[test]
    fn test_rewrite_to_front_controller_with_query() {
        let mut config = config();
        config.rewrite.push(RewriteRuleConfig::new(r"^/blog/(\w+)$", "/index.php?slug=$1"));

        let env = translate(&config, "/blog/hello").unwrap();
        assert_eq!(env.get("DOCUMENT_URI"), Some("/index.php"));
        assert_eq!(env.get("QUERY_STRING"), Some("slug=hello"));
        assert_eq!(env.get("SCRIPT_NAME"), Some("index.php"));
    }

    #[test]
    fn test_invalid_targets_are_rejected() {
        assert!(matches!(translate(&config(), ""), Err(GatewayError::InvalidRequest(_))));
        assert!(matches!(translate(&config(), "*"), Err(GatewayError::InvalidRequest(_))));
        assert!(matches!(
            translate(&config(), "index.php"),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_rewrite_must_produce_absolute_uri() {
        let mut config = config();
        config.rewrite.push(RewriteRuleConfig::new("^/x", "relative"));
        assert!(matches!(translate(&config, "/x"), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn test_preset_script_wins() {
        let mut config = config();
        config.script = Some("/var/www/public/index.php".into());
        let env = translate(&config, "/anything/here").unwrap();
        assert_eq!(env.get("SCRIPT_FILENAME"), Some("/var/www/public/index.php"));
        assert_eq!(env.get("SCRIPT_NAME"), Some("index.php"));
        assert_eq!(env.get("DOCUMENT_URI"), Some("/anything/here"));
    }

    #[test]
    fn test_dot_segments_stay_inside_root() {
        let env = translate(&config(), "/a/../../etc/passwd").unwrap();
        assert_eq!(env.get("SCRIPT_FILENAME"), Some("/var/www/etc/passwd"));

        let env = translate(&config(), "/dir/./sub/").unwrap();
        assert_eq!(env.get("SCRIPT_FILENAME"), Some("/var/www/dir/sub/"));
    }

    #[test]
    fn test_debug_flag_does_not_change_environment() {
        let mut debug_config = config();
        debug_config.debug = true;
        debug_config.params.insert("APP_ENV".into(), "test".into());
        let mut quiet_config = debug_config.clone();
        quiet_config.debug = false;

        let conn = ConnectionMeta {
            remote_addr: Some("10.0.0.7:51000".parse().unwrap()),
            server_name: Some("example.test".into()),
            scheme: "https".into(),
        };
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "a=1".parse().unwrap());

        let build = |config: &GatewayConfig| {
            RequestTranslator::from_config(config)
                .unwrap()
                .translate(&Method::POST, "/app.php?x=1", &headers, &conn)
                .unwrap()
        };

        let quiet = build(&quiet_config);
        let debug = build(&debug_config);
        assert_eq!(quiet, debug);
        assert_eq!(
            quiet.iter().collect::<Vec<_>>(),
            debug.iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_static_params_are_overridden_by_computed_values() {
        let mut config = config();
        config.params.insert("APP_ENV".into(), "test".into());
        config.params.insert("DOCUMENT_ROOT".into(), "/ignored".into());

        let env = translate(&config, "/").unwrap();
        assert_eq!(env.get("APP_ENV"), Some("test"));
        assert_eq!(env.get("DOCUMENT_ROOT"), Some("/var/www"));
    }

    #[test]
    fn test_headers_and_connection() {
        let translator = RequestTranslator::from_config(&config()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, "13".parse().unwrap());
        headers.insert("x-custom-thing", "yes".parse().unwrap());
        headers.append(header::ACCEPT, "text/html".parse().unwrap());
        headers.append(header::ACCEPT, "application/json".parse().unwrap());
        headers.append(header::COOKIE, "a=1".parse().unwrap());
        headers.append(header::COOKIE, "b=2".parse().unwrap());

        let conn = ConnectionMeta {
            remote_addr: Some("10.1.2.3:51000".parse().unwrap()),
            server_name: Some("example.test".into()),
            scheme: "https".into(),
        };

        let env = translator
            .translate(&Method::POST, "/submit", &headers, &conn)
            .unwrap();

        assert_eq!(env.get("REQUEST_METHOD"), Some("POST"));
        assert_eq!(env.get("CONTENT_TYPE"), Some("application/json"));
        assert_eq!(env.get("CONTENT_LENGTH"), Some("13"));
        assert_eq!(env.get("HTTP_CONTENT_TYPE"), Some("application/json"));
        assert_eq!(env.get("HTTP_X_CUSTOM_THING"), Some("yes"));
        assert_eq!(env.get("HTTP_ACCEPT"), Some("text/html, application/json"));
        assert_eq!(env.get("HTTP_COOKIE"), Some("a=1; b=2"));
        assert_eq!(env.get("REQUEST_SCHEME"), Some("https"));
        assert_eq!(env.get("HTTPS"), Some("on"));
        assert_eq!(env.get("REMOTE_ADDR"), Some("10.1.2.3"));
        assert_eq!(env.get("REMOTE_PORT"), Some("51000"));
        assert_eq!(env.get("SERVER_NAME"), Some("example.test"));
    }

    #[test]
    fn test_connection_meta_from_request() {
        let mut config = config();
        config.trust_forwarded_proto = true;

        let mut request = Request::builder()
            .uri("/index.php")
            .header(header::HOST, "shop.example:8080")
            .header(X_FORWARDED_PROTO, "HTTPS, http")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("[::1]:4000".parse::<SocketAddr>().unwrap()));

        let conn = ConnectionMeta::from_request(&request, &config);
        assert_eq!(conn.server_name.as_deref(), Some("shop.example"));
        assert_eq!(conn.scheme, "https");
        assert_eq!(conn.remote_addr.unwrap().port(), 4000);

        config.trust_forwarded_proto = false;
        config.server_name = Some("fallback.example".into());
        let request = Request::builder()
            .uri("/")
            .header(X_FORWARDED_PROTO, "https")
            .body(Body::empty())
            .unwrap();
        let conn = ConnectionMeta::from_request(&request, &config);
        assert_eq!(conn.scheme, "http");
        assert_eq!(conn.server_name.as_deref(), Some("fallback.example"));
        assert_eq!(conn.remote_addr, None);
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("example.com:80"), "example.com");
        assert_eq!(strip_port("example.com"), "example.com");
        assert_eq!(strip_port("[2001:db8::1]:443"), "[2001:db8::1]");
    }

    #[test]
    fn test_environment_serializes_in_order() {
        let mut env = Environment::new();
        env.insert("B", "2");
        env.insert("A", "1");
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"B":"2","A":"1"}"#);
    }
}
