//! Notification queue access
//!
//! [`QueueClient`] is the seam between the reconcile cycle and SQS so the
//! cycle can be exercised against mocks. [`SqsQueueClient`] is the production
//! implementation on the AWS SDK.

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::DeleteMessageBatchRequestEntry;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use reloader_common::{Error, QueuePollConfig};

use crate::notification::Notification;

/// Service limit on entries in one batch delete request
pub const MAX_DELETE_BATCH: usize = 10;

/// A notification to acknowledge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteEntry {
    /// Message id, used to correlate per-entry results
    pub id: String,
    /// Receipt handle of the delivery being acknowledged
    pub receipt_handle: String,
}

impl From<&Notification> for DeleteEntry {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            receipt_handle: n.receipt_handle.clone(),
        }
    }
}

/// A batch entry the queue refused to delete
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Message id of the entry
    pub id: String,
    /// Error code reported by the queue
    pub code: String,
    /// Error message reported by the queue, if any
    pub message: Option<String>,
}

/// Per-entry result of a batch delete
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Ids deleted successfully
    pub deleted: Vec<String>,
    /// Entries that failed
    pub failed: Vec<DeleteFailure>,
}

impl DeleteOutcome {
    /// Fold another outcome into this one
    pub fn merge(&mut self, other: DeleteOutcome) {
        self.deleted.extend(other.deleted);
        self.failed.extend(other.failed);
    }
}

/// Trait abstracting the notification queue
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Receive up to `poll.max_messages` visible notifications, hiding them
    /// from other consumers for the visibility timeout
    async fn receive(&self, poll: &QueuePollConfig) -> Result<Vec<Notification>, Error>;

    /// Delete the given deliveries in one request (at most [`MAX_DELETE_BATCH`])
    async fn delete_batch(&self, entries: &[DeleteEntry]) -> Result<DeleteOutcome, Error>;
}

/// SQS implementation of [`QueueClient`]
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueueClient {
    /// Wrap an existing SDK client
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Build a client for the given region using the default credential chain
    pub async fn from_region(region: &str, queue_url: impl Into<String>) -> Self {
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self::new(aws_sdk_sqs::Client::new(&sdk_config), queue_url)
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn receive(&self, poll: &QueuePollConfig) -> Result<Vec<Notification>, Error> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(poll.max_messages)
            .visibility_timeout(poll.visibility_timeout_secs)
            .wait_time_seconds(poll.wait_time_secs)
            .send()
            .await
            .map_err(|e| Error::queue("receive", DisplayErrorContext(&e).to_string()))?;

        let mut notifications = Vec::new();
        for message in output.messages() {
            match (message.message_id(), message.receipt_handle()) {
                (Some(id), Some(receipt_handle)) => notifications.push(Notification {
                    id: id.to_string(),
                    receipt_handle: receipt_handle.to_string(),
                    body: message.body().unwrap_or_default().to_string(),
                }),
                _ => warn!(
                    message_id = ?message.message_id(),
                    "skipping message without id or receipt handle"
                ),
            }
        }

        debug!(count = notifications.len(), "received notifications");
        Ok(notifications)
    }

    async fn delete_batch(&self, entries: &[DeleteEntry]) -> Result<DeleteOutcome, Error> {
        if entries.is_empty() {
            return Ok(DeleteOutcome::default());
        }

        let request_entries = entries
            .iter()
            .map(|e| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(&e.id)
                    .receipt_handle(&e.receipt_handle)
                    .build()
                    .map_err(|err| Error::queue("delete", err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(request_entries))
            .send()
            .await
            .map_err(|e| Error::queue("delete", DisplayErrorContext(&e).to_string()))?;

        Ok(DeleteOutcome {
            deleted: output.successful().iter().map(|s| s.id().to_string()).collect(),
            failed: output
                .failed()
                .iter()
                .map(|f| DeleteFailure {
                    id: f.id().to_string(),
                    code: f.code().to_string(),
                    message: f.message().map(str::to_string),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_entry_from_notification() {
        let n = Notification {
            id: "m-1".into(),
            receipt_handle: "r-1".into(),
            body: "{}".into(),
        };
        assert_eq!(
            DeleteEntry::from(&n),
            DeleteEntry {
                id: "m-1".into(),
                receipt_handle: "r-1".into()
            }
        );
    }

    #[test]
    fn outcomes_merge() {
        let mut total = DeleteOutcome {
            deleted: vec!["a".into()],
            failed: vec![],
        };
        total.merge(DeleteOutcome {
            deleted: vec!["b".into()],
            failed: vec![DeleteFailure {
                id: "c".into(),
                code: "ReceiptHandleIsInvalid".into(),
                message: None,
            }],
        });
        assert_eq!(total.deleted, vec!["a", "b"]);
        assert_eq!(total.failed.len(), 1);
    }
}
