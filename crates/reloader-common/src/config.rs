//! Process configuration
//!
//! The operator binary reads these settings from CLI flags (falling back to
//! the `ENV_*` variables) once at startup and validates them here. The result
//! is passed into the controller as a value; nothing in the reconcile path
//! reads the environment.

use std::time::Duration;

use crate::{Error, Result};

/// Queue URL of the rotation notification queue (required)
pub const ENV_QUEUE_URL: &str = "SECRETS_SQS_QUEUE_URL";
/// AWS region of the queue (required)
pub const ENV_REGION: &str = "AWS_DEFAULT_REGION";
/// Seconds between reconciliation cycles
pub const ENV_REQUEUE_AFTER: &str = "SECRETS_ROTATE_AFTER";
/// Maximum notifications fetched per cycle
pub const ENV_MAX_MESSAGES: &str = "SECRETS_SQS_MAX_MESSAGES";
/// Seconds a fetched notification stays hidden from other consumers
pub const ENV_VISIBILITY_TIMEOUT: &str = "SECRETS_SQS_VISIBILITY_TIMEOUT";
/// Seconds a receive call may wait for notifications to arrive
pub const ENV_WAIT_TIME: &str = "SECRETS_SQS_WAIT_TIME";

/// Default seconds between cycles
pub const DEFAULT_REQUEUE_AFTER_SECS: u64 = 5;
/// Default and maximum notifications per receive call
pub const MAX_MESSAGES_LIMIT: i32 = 10;
/// Default visibility hold in seconds
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: i32 = 20;
/// Upper bound the queue accepts for a visibility hold (12 hours)
pub const MAX_VISIBILITY_TIMEOUT_SECS: i32 = 43_200;
/// Upper bound the queue accepts for a receive wait
pub const MAX_WAIT_TIME_SECS: i32 = 20;

/// Parameters of a single receive call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueuePollConfig {
    /// Batch bound, 1..=10
    pub max_messages: i32,
    /// Visibility hold applied to fetched notifications, in seconds
    pub visibility_timeout_secs: i32,
    /// Receive wait in seconds; 0 disables long polling
    pub wait_time_secs: i32,
}

impl Default for QueuePollConfig {
    fn default() -> Self {
        Self {
            max_messages: MAX_MESSAGES_LIMIT,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            wait_time_secs: 0,
        }
    }
}

impl QueuePollConfig {
    /// Check the values against the limits the queue enforces
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_MESSAGES_LIMIT).contains(&self.max_messages) {
            return Err(Error::config(
                ENV_MAX_MESSAGES,
                format!("must be between 1 and {MAX_MESSAGES_LIMIT}"),
            ));
        }
        if !(0..=MAX_VISIBILITY_TIMEOUT_SECS).contains(&self.visibility_timeout_secs) {
            return Err(Error::config(
                ENV_VISIBILITY_TIMEOUT,
                format!("must be between 0 and {MAX_VISIBILITY_TIMEOUT_SECS}"),
            ));
        }
        if !(0..=MAX_WAIT_TIME_SECS).contains(&self.wait_time_secs) {
            return Err(Error::config(
                ENV_WAIT_TIME,
                format!("must be between 0 and {MAX_WAIT_TIME_SECS}"),
            ));
        }
        Ok(())
    }
}

/// Everything the controller needs besides its clients
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReloaderConfig {
    /// URL of the notification queue
    pub queue_url: String,
    /// AWS region hosting the queue
    pub region: String,
    /// Delay before the next cycle, after success and failure alike
    pub requeue_after: Duration,
    /// Receive parameters
    pub queue: QueuePollConfig,
}

impl ReloaderConfig {
    /// Build and validate a configuration from explicit values
    pub fn new(
        queue_url: impl Into<String>,
        region: impl Into<String>,
        requeue_after_secs: u64,
        queue: QueuePollConfig,
    ) -> Result<Self> {
        let queue_url = queue_url.into();
        let region = region.into();

        if queue_url.trim().is_empty() {
            return Err(Error::config(ENV_QUEUE_URL, "queue URL must be set"));
        }
        if region.trim().is_empty() {
            return Err(Error::config(ENV_REGION, "region must be set"));
        }
        if requeue_after_secs == 0 {
            return Err(Error::config(ENV_REQUEUE_AFTER, "must be at least 1 second"));
        }
        queue.validate()?;

        Ok(Self {
            queue_url,
            region,
            requeue_after: Duration::from_secs(requeue_after_secs),
            queue,
        })
    }
}
