//! Custom Resource Definitions for the secret reloader

mod sqs_secret;

pub use sqs_secret::{SQSSecret, SQSSecretPhase, SQSSecretSpec, SQSSecretStatus, WatchedSecret};
