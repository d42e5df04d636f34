//! Orchestrator configuration.
//!
//! Configuration is loaded from environment variables with defaults matching
//! the product contract (90-second response window, 90-second ring timeout).

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default response window for instant sessions, in seconds.
///
/// The doctor must respond to the patient's first message within this window
/// for the session to activate.
pub const DEFAULT_RESPONSE_WINDOW_SECS: u64 = 90;

/// Default ring timeout for call attempts, in seconds.
pub const DEFAULT_RING_TIMEOUT_SECS: u64 = 90;

/// Default grace period after transport loss before a call degrades to an
/// error terminal state, in seconds.
pub const DEFAULT_RECONNECT_GRACE_SECS: u64 = 15;

/// Default mailbox buffer size for entity actors.
pub const DEFAULT_MAILBOX_BUFFER: usize = 64;

/// Default buffer size for the notification side-channel.
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 32;

/// Orchestrator configuration.
///
/// Loaded from environment variables with sensible defaults, or constructed
/// directly in tests.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a doctor has to respond to a patient's first message.
    pub response_window: Duration,

    /// How long a call invite may ring before the attempt times out.
    pub ring_timeout: Duration,

    /// How long a call survives a transport loss before degrading to
    /// `Ended` with an error reason.
    pub reconnect_grace: Duration,

    /// Buffer size for entity actor mailboxes.
    pub mailbox_buffer: usize,

    /// Buffer size for the notification side-channel.
    pub notification_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            response_window: Duration::from_secs(DEFAULT_RESPONSE_WINDOW_SECS),
            ring_timeout: Duration::from_secs(DEFAULT_RING_TIMEOUT_SECS),
            reconnect_grace: Duration::from_secs(DEFAULT_RECONNECT_GRACE_SECS),
            mailbox_buffer: DEFAULT_MAILBOX_BUFFER,
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {variable}: {value}")]
    InvalidValue { variable: String, value: String },
}

impl OrchestratorConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let response_window = Duration::from_secs(parse_secs(
            vars,
            "TELECARE_RESPONSE_WINDOW_SECS",
            DEFAULT_RESPONSE_WINDOW_SECS,
        )?);

        let ring_timeout = Duration::from_secs(parse_secs(
            vars,
            "TELECARE_RING_TIMEOUT_SECS",
            DEFAULT_RING_TIMEOUT_SECS,
        )?);

        let reconnect_grace = Duration::from_secs(parse_secs(
            vars,
            "TELECARE_RECONNECT_GRACE_SECS",
            DEFAULT_RECONNECT_GRACE_SECS,
        )?);

        let mailbox_buffer = vars
            .get("TELECARE_MAILBOX_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAILBOX_BUFFER);

        let notification_buffer = vars
            .get("TELECARE_NOTIFICATION_BUFFER")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_NOTIFICATION_BUFFER);

        Ok(Self {
            response_window,
            ring_timeout,
            reconnect_grace,
            mailbox_buffer,
            notification_buffer,
        })
    }
}

/// Parse a seconds-valued variable, rejecting zero (a zero window would make
/// every session expire before the first message is processed).
fn parse_secs(
    vars: &HashMap<String, String>,
    variable: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(variable) {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::InvalidValue {
                variable: variable.to_string(),
                value: raw.clone(),
            }),
        },
    }
}
