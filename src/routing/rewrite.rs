//! URI rewriting.
//!
//! # Responsibilities
//! - Compile configured rewrite rules once at startup
//! - Find the first rule whose pattern matches the request uri
//! - Expand `$N` back-references in the replacement template
//!
//! # Design Decisions
//! - First match wins; later rules are never tried
//! - Patterns are searched, not anchored (anchor with `^`/`$` in the pattern)
//! - A group that did not participate in the match expands to nothing
//! - Multi-digit references (`$10` and up) name their own group

use regex::{Captures, Regex};

use crate::config::RewriteRuleConfig;

/// Pattern used for rules configured without `search`.
const MATCH_ALL: &str = ".*";

/// A compiled rewrite rule.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    search: Regex,
    replace: String,
}

impl RewriteRule {
    /// Compile a rule from a pattern and replacement template.
    pub fn new(search: &str, replace: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            search: Regex::new(search)?,
            replace: replace.into(),
        })
    }

    /// Apply the rule to `uri`, or `None` if the pattern does not match.
    pub fn apply(&self, uri: &str) -> Option<String> {
        self.search
            .captures(uri)
            .map(|captures| expand(&self.replace, &captures))
    }
}

/// Substitute every `$N` in `template` with capture group N.
///
/// Highest index first, so `$12` is never read as `$1` followed by `2`.
fn expand(template: &str, captures: &Captures<'_>) -> String {
    let mut result = template.to_string();
    for index in (0..captures.len()).rev() {
        let placeholder = format!("${index}");
        if result.contains(&placeholder) {
            let group = captures.get(index).map_or("", |m| m.as_str());
            result = result.replace(&placeholder, group);
        }
    }
    result
}

/// The result of rewriting a uri that matched a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    /// The rewritten uri.
    pub uri: String,
    /// The uri before rewriting.
    pub outer_uri: String,
}

/// Ordered, immutable set of rewrite rules.
#[derive(Debug, Clone, Default)]
pub struct Rewriter {
    rules: Vec<RewriteRule>,
}

impl Rewriter {
    /// Build a rewriter from compiled rules.
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// Compile the rules from configuration, preserving their order.
    pub fn from_config(configs: &[RewriteRuleConfig]) -> Result<Self, regex::Error> {
        let rules = configs
            .iter()
            .map(|c| RewriteRule::new(c.search.as_deref().unwrap_or(MATCH_ALL), c.replace.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// Rewrite `uri` with the first matching rule.
    pub fn rewrite(&self, uri: &str) -> Option<Rewritten> {
        self.rules.iter().find_map(|rule| {
            rule.apply(uri).map(|rewritten| Rewritten {
                uri: rewritten,
                outer_uri: uri.to_string(),
            })
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
