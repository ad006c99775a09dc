//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Root configuration for the FastCGI gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Backend connection settings handed to the transport.
    pub backend: BackendConfig,

    /// Document root as seen by the backend.
    pub document_root: String,

    /// Script to execute for every request (front controller).
    /// When unset the script is resolved from the request path.
    pub script: Option<String>,

    /// Rewrite rules, evaluated in order. Accepts one table or an array.
    #[serde(deserialize_with = "one_or_many")]
    pub rewrite: Vec<RewriteRuleConfig>,

    /// Log the computed CGI environment of every request.
    pub debug: bool,

    /// Static parameters merged into every environment.
    pub params: BTreeMap<String, String>,

    /// SERVER_SOFTWARE value.
    pub server_software: String,

    /// Scheme reported when the request itself does not carry one.
    pub scheme: String,

    /// Honour `X-Forwarded-Proto` from a TLS-terminating front proxy.
    pub trust_forwarded_proto: bool,

    /// SERVER_NAME fallback when the request has no Host header.
    pub server_name: Option<String>,

    /// Size limits.
    pub limits: LimitsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let document_root = std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string());

        Self {
            backend: BackendConfig::default(),
            document_root,
            script: None,
            rewrite: Vec::new(),
            debug: false,
            params: BTreeMap::new(),
            server_software: concat!("fcgi-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
            scheme: "http".to_string(),
            trust_forwarded_proto: false,
            server_name: None,
            limits: LimitsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// FastCGI backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address (e.g., "127.0.0.1:9000" or "unix:/run/php-fpm.sock").
    pub address: String,

    /// Connect when the server starts instead of on the first request.
    pub connect_on_start: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9000".to_string(),
            connect_on_start: false,
        }
    }
}

/// A single rewrite rule as written in the config file.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RewriteRuleConfig {
    /// Regex searched in the request uri. Missing means "match everything".
    #[serde(default)]
    pub search: Option<String>,

    /// Replacement template; `$N` is capture group N.
    pub replace: String,
}

impl RewriteRuleConfig {
    /// Convenience constructor.
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: Some(search.into()),
            replace: replace.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(RewriteRuleConfig),
    Many(Vec<RewriteRuleConfig>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<RewriteRuleConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(rule) => vec![rule],
        OneOrMany::Many(rules) => rules,
    })
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,

    /// Maximum size of the backend header block in bytes.
    pub max_header_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 8 * 1024 * 1024, // 8MB
            max_header_bytes: 64 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
