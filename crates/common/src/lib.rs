//! Common types shared across Telecare components.

#![warn(clippy::pedantic)]

/// Module for shared identifier and role types
pub mod types;

/// Module for connection credentials
pub mod credentials;

/// Module for secret types that prevent accidental logging
pub mod secret;
