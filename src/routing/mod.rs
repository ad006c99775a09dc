//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request uri
//!     → rewrite.rs (first matching rule, `$N` expansion)
//!     → Return: rewritten uri + original uri, or no match
//!
//! Rule Compilation (at startup):
//!     RewriteRuleConfig[]
//!     → Compile regexes in configured order
//!     → Freeze as immutable Rewriter
//! ```
//!
//! # Design Decisions
//! - Rules compiled at startup, immutable at runtime
//! - Deterministic: same input always matches same rule
//! - First match wins (configured order)

pub mod rewrite;

pub use rewrite::{RewriteRule, Rewriter, Rewritten};
