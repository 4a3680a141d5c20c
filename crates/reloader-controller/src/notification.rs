//! Rotation notification decoding and matching
//!
//! Notifications are EventBridge envelopes around CloudTrail records:
//!
//! ```json
//! {
//!   "detail-type": "AWS API Call via CloudTrail",
//!   "detail": {
//!     "eventName": "PutSecretValue",
//!     "requestParameters": { "secretId": "arn:aws:secretsmanager:..." }
//!   }
//! }
//! ```
//!
//! Only the fields above are read. Every field is optional in the schema, so
//! a payload of the wrong shape decodes to an error instead of panicking, and
//! an undecodable payload never matches.

use serde::Deserialize;
use thiserror::Error;

use reloader_common::crd::WatchedSecret;
use reloader_common::PUT_SECRET_VALUE_EVENT;

/// One message received from the queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// Queue-assigned message id
    pub id: String,
    /// Token required to delete this delivery of the message
    pub receipt_handle: String,
    /// Raw message body
    pub body: String,
}

/// Why a notification body could not be decoded
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body is not JSON or a field has the wrong type
    #[error("malformed notification body: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Body has no `detail` object
    #[error("notification has no detail object")]
    MissingDetail,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    detail: Option<Detail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Detail {
    #[serde(default)]
    event_name: Option<String>,
    #[serde(default)]
    request_parameters: Option<RequestParameters>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequestParameters {
    #[serde(default)]
    secret_id: Option<String>,
}

/// The parts of a rotation notification the controller acts on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationEvent {
    /// API call that produced the event (e.g. `PutSecretValue`)
    pub event_name: Option<String>,
    /// Secret the call was made against
    pub secret_id: Option<String>,
}

impl RotationEvent {
    /// Decode a notification body
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(body)?;
        let detail = envelope.detail.ok_or(DecodeError::MissingDetail)?;

        Ok(Self {
            event_name: detail.event_name,
            secret_id: detail.request_parameters.and_then(|p| p.secret_id),
        })
    }

    /// Decide whether this event requires restarting the watched workloads
    pub fn verdict(&self, watched: &WatchedSecret) -> Verdict {
        match self.event_name.as_deref() {
            Some(PUT_SECRET_VALUE_EVENT) => {}
            other => {
                return Verdict::Ignore(IgnoreReason::OtherEvent(
                    other.unwrap_or_default().to_string(),
                ))
            }
        }

        match self.secret_id.as_deref() {
            None => Verdict::Ignore(IgnoreReason::MissingSecretId),
            Some(id) if id == watched.secret_id => Verdict::Restart,
            Some(id) => Verdict::Ignore(IgnoreReason::OtherSecret(id.to_string())),
        }
    }
}

/// Outcome of matching one notification against a watched secret
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// The watched secret got a new value
    Restart,
    /// Nothing to do; the notification is still acknowledged
    Ignore(IgnoreReason),
}

/// Why a notification needs no action
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Body could not be decoded
    Undecodable(String),
    /// Event is not a secret value update (empty when absent)
    OtherEvent(String),
    /// Value update without a secret id
    MissingSecretId,
    /// Value update for a different secret
    OtherSecret(String),
}

/// Decode a notification and match it in one step, failing closed
pub fn classify(notification: &Notification, watched: &WatchedSecret) -> Verdict {
    match RotationEvent::decode(&notification.body) {
        Ok(event) => event.verdict(watched),
        Err(e) => Verdict::Ignore(IgnoreReason::Undecodable(e.to_string())),
    }
}
