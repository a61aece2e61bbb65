use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Delay applied to a message nacked after a processing failure.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dispatch_core::queue::RetryDelayPolicy;
///
/// let policy = RetryDelayPolicy::Exponential {
///     initial: Duration::from_millis(100),
///     max: Duration::from_secs(1),
/// };
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
/// assert_eq!(policy.delay_for(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryDelayPolicy {
    /// Same delay for every attempt
    Fixed {
        /// Delay before redelivery
        #[serde(with = "crate::config::millis")]
        delay: Duration,
    },
    /// `initial * 2^redelivery_count`, capped at `max`
    Exponential {
        /// Delay for the first redelivery
        #[serde(with = "crate::config::millis")]
        initial: Duration,
        /// Upper bound
        #[serde(with = "crate::config::millis")]
        max: Duration,
    },
}

impl Default for RetryDelayPolicy {
    fn default() -> Self {
        RetryDelayPolicy::Fixed {
            delay: Duration::ZERO,
        }
    }
}

impl RetryDelayPolicy {
    /// Returns the delay for a message already redelivered `redelivery_count` times.
    pub fn delay_for(&self, redelivery_count: u32) -> Duration {
        match *self {
            RetryDelayPolicy::Fixed { delay } => delay,
            RetryDelayPolicy::Exponential { initial, max } => {
                let factor = 1_u32.checked_shl(redelivery_count).unwrap_or(u32::MAX);
                initial.checked_mul(factor).map_or(max, |d| d.min(max))
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            RetryDelayPolicy::Exponential { initial, max } if initial > max => {
                Err(ConfigError::RetryBounds { initial, max })
            }
            _ => Ok(()),
        }
    }
}
