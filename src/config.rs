//! Configuration for the dispatchers, consumers and logging.
//!
//! Every struct deserializes with serde and falls back to its `Default` for
//! absent fields, so hosts can load them from any format they like.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::identity::DEFAULT_IDENTITY_HEADER;
use crate::queue::RetryDelayPolicy;
use crate::request::Principal;

/// Redelivery count above which a delivery is logged as suspicious.
pub const DEFAULT_REDELIVERY_WARN_THRESHOLD: u32 = 10;

/// Default number of messages a consumer keeps in flight.
pub const DEFAULT_PREFETCH: usize = 16;

/// Default wait between empty polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Errors raised by `validate()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A header name was empty
    #[error("{field} must not be empty")]
    EmptyHeader {
        /// Name of the offending field
        field: &'static str,
    },
    /// A value was zero where a positive value is needed
    #[error("{field} must be greater than zero")]
    Zero {
        /// Name of the offending field
        field: &'static str,
    },
    /// A value exceeded what the runtime can represent
    #[error("{field} must be at most {max}, got {value}")]
    TooLarge {
        /// Name of the offending field
        field: &'static str,
        /// Configured value
        value: usize,
        /// Largest accepted value
        max: usize,
    },
    /// A retry policy's initial delay exceeded its cap
    #[error("retry_delay: initial delay {initial:?} exceeds max {max:?}")]
    RetryBounds {
        /// Configured initial delay
        initial: Duration,
        /// Configured cap
        max: Duration,
    },
}

/// Settings shared by the HTTP and queue dispatch paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Service name stamped on spans
    pub service_name: String,
    /// Header carrying the encoded principal
    pub identity_header: String,
    /// Principal used when a call carries no identity and its route has no default
    pub default_principal: Option<Principal>,
    /// Redelivery count above which deliveries are logged at warn level
    pub redelivery_warn_threshold: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            service_name: "dispatch".to_string(),
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            default_principal: None,
            redelivery_warn_threshold: DEFAULT_REDELIVERY_WARN_THRESHOLD,
        }
    }
}

impl DispatchConfig {
    /// Sets the global default principal.
    pub fn with_default_principal(mut self, principal: Principal) -> Self {
        self.default_principal = Some(principal);
        self
    }

    /// Checks the configuration for values that can never work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_header.trim().is_empty() {
            return Err(ConfigError::EmptyHeader {
                field: "identity_header",
            });
        }
        Ok(())
    }
}

/// Settings of a single queue consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Maximum number of messages processed concurrently
    pub prefetch: usize,
    /// Wait between polls that returned nothing
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Principal used for messages without an identity header
    pub default_principal: Option<Principal>,
    /// Delay applied when a failed message is nacked
    pub retry_delay: RetryDelayPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch: DEFAULT_PREFETCH,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_principal: None,
            retry_delay: RetryDelayPolicy::default(),
        }
    }
}

impl ConsumerConfig {
    /// Sets the consumer's default principal.
    pub fn with_default_principal(mut self, principal: Principal) -> Self {
        self.default_principal = Some(principal);
        self
    }

    /// Sets the retry delay policy.
    pub fn with_retry_delay(mut self, policy: RetryDelayPolicy) -> Self {
        self.retry_delay = policy;
        self
    }

    /// Sets the prefetch bound.
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Checks the configuration for values that can never work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefetch == 0 {
            return Err(ConfigError::Zero { field: "prefetch" });
        }
        let max = max_prefetch();
        if self.prefetch > max {
            return Err(ConfigError::TooLarge {
                field: "prefetch",
                value: self.prefetch,
                max,
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero {
                field: "poll_interval",
            });
        }
        self.retry_delay.validate()
    }
}

// The poller holds one semaphore permit per in-flight message and drains
// them all at once with `acquire_many(u32)`.
pub(crate) fn max_prefetch() -> usize {
    Semaphore::MAX_PERMITS.min(u32::MAX as usize)
}

/// Supported log output formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable single line output
    #[default]
    Compact,
    /// Structured JSON, one object per event
    Json,
}

/// Settings for [`crate::telemetry::init`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info,dispatch_core=debug`
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Serializes a `Duration` as whole milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
