//! Configuration validation.
//!
//! Serde handles syntax; this module checks meaning. Returns every problem
//! found rather than stopping at the first one.

use std::fmt;
use std::net::SocketAddr;

use regex::Regex;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.document_root.is_empty() {
        errors.push(ValidationError::new("document_root", "must not be empty"));
    } else if !config.document_root.starts_with('/') {
        errors.push(ValidationError::new("document_root", "must be an absolute path"));
    }

    if let Some(script) = &config.script {
        if !script.starts_with('/') {
            errors.push(ValidationError::new("script", "must be an absolute path"));
        }
    }

    if config.backend.address.trim().is_empty() {
        errors.push(ValidationError::new("backend.address", "must not be empty"));
    }

    for (i, rule) in config.rewrite.iter().enumerate() {
        if let Some(search) = &rule.search {
            if let Err(e) = Regex::new(search) {
                errors.push(ValidationError::new(format!("rewrite[{i}].search"), e.to_string()));
            }
        }
        if rule.replace.is_empty() {
            errors.push(ValidationError::new(format!("rewrite[{i}].replace"), "must not be empty"));
        }
    }

    if config.scheme != "http" && config.scheme != "https" {
        errors.push(ValidationError::new("scheme", "must be \"http\" or \"https\""));
    }

    for key in config.params.keys() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            errors.push(ValidationError::new(
                format!("params.{key}"),
                "parameter names must be non-empty and contain no '=' or NUL",
            ));
        }
    }

    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::new("limits.max_body_size", "must be greater than zero"));
    }
    if config.limits.max_header_bytes == 0 {
        errors.push(ValidationError::new("limits.max_header_bytes", "must be greater than zero"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RewriteRuleConfig;

    fn base() -> GatewayConfig {
        GatewayConfig {
            document_root: "/srv/app".into(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_default_shaped_config_is_valid() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn test_bad_rewrite_is_reported_with_index() {
        let mut config = base();
        config.rewrite.push(RewriteRuleConfig::new("^/ok", "/fine"));
        config.rewrite.push(RewriteRuleConfig::new("[", "/broken"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "rewrite[1].search");
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = base();
        config.observability.metrics_address = "not an address".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");
    }

    #[test]
    fn test_param_names_are_checked() {
        let mut config = base();
        config.params.insert("A=B".into(), "x".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "params.A=B");
    }
}
