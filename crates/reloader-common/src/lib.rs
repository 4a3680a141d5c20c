//! Common types for the secret reloader: CRD, configuration, errors, telemetry, metrics

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use config::{QueuePollConfig, ReloaderConfig};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "secret-reloader";

/// Pod-template label whose value change forces a rolling restart
pub const RESTART_LABEL: &str = "secretreload.dev/redeployed-at";

/// Event name that marks a new secret value
pub const PUT_SECRET_VALUE_EVENT: &str = "PutSecretValue";
