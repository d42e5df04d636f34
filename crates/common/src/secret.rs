//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for all
//! sensitive values such as bearer tokens and API keys.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one cannot leak the value through `{:?}` or
//! tracing fields. Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Session {
//!     user: String,
//!     token: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let s = Session {
//!     user: "alice".to_string(),
//!     token: SecretString::from("bearer-abc123"),
//! };
//!
//! // Access requires an explicit expose_secret() call.
//! let raw: &str = s.token.expose_secret();
//! # assert_eq!(raw, "bearer-abc123");
//! ```
//!
//! # Telecare usage guidelines
//!
//! Use `SecretString` for:
//! - Signaling-channel bearer tokens
//! - API keys
//!
//! Use `SecretBox<T>` for custom secret types (e.g. binary key material).

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
