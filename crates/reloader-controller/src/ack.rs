//! Acknowledgement batching
//!
//! Notifications are acknowledged (deleted from the queue) only once the whole
//! cycle has finished without a blocking error. An [`AckBatch`] that is
//! dropped without [`AckBatch::flush`] deletes nothing, so every notification
//! it held is redelivered after its visibility timeout.
//!
//! A standard queue may hand out the same message twice in one receive. The
//! batch keeps one entry per message id, with the most recent receipt handle,
//! since a delete request carrying a repeated id is rejected as a whole.

use tracing::{debug, warn};

use reloader_common::Error;

use crate::notification::Notification;
use crate::queue::{DeleteEntry, DeleteOutcome, QueueClient, MAX_DELETE_BATCH};

/// Deliveries to delete at the end of a cycle
#[derive(Debug, Default)]
pub struct AckBatch {
    entries: Vec<DeleteEntry>,
}

impl AckBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a notification as fully handled
    pub fn push(&mut self, notification: &Notification) {
        let entry = DeleteEntry::from(notification);
        let existing = self.entries.iter().position(|e| e.id == entry.id);
        match existing {
            Some(index) => {
                debug!(message_id = %entry.id, "duplicate delivery in batch");
                self.entries[index] = entry;
            }
            None => self.entries.push(entry),
        }
    }

    /// Number of distinct notifications held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete every held notification
    ///
    /// Entries the queue rejects are logged and left to reappear after their
    /// visibility timeout. A failed request for one chunk does not stop the
    /// remaining chunks; the first such error is returned after all chunks
    /// were attempted.
    pub async fn flush(self, queue: &dyn QueueClient) -> Result<DeleteOutcome, Error> {
        let mut outcome = DeleteOutcome::default();
        if self.is_empty() {
            return Ok(outcome);
        }

        let mut first_error = None;
        for chunk in self.entries.chunks(MAX_DELETE_BATCH) {
            match queue.delete_batch(chunk).await {
                Ok(result) => outcome.merge(result),
                Err(e) => {
                    warn!(entries = chunk.len(), error = %e, "batch delete request failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        for failure in &outcome.failed {
            warn!(
                message_id = %failure.id,
                code = %failure.code,
                reason = failure.message.as_deref().unwrap_or_default(),
                "notification not deleted, it will be redelivered"
            );
        }
        debug!(
            deleted = outcome.deleted.len(),
            failed = outcome.failed.len(),
            "acknowledged notifications"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DeleteFailure, MockQueueClient};

    fn notification(i: usize) -> Notification {
        Notification {
            id: format!("m-{i}"),
            receipt_handle: format!("r-{i}"),
            body: String::new(),
        }
    }

    fn all_deleted(entries: &[DeleteEntry]) -> DeleteOutcome {
        DeleteOutcome {
            deleted: entries.iter().map(|e| e.id.clone()).collect(),
            failed: vec![],
        }
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let queue = MockQueueClient::new();
        let outcome = AckBatch::new().flush(&queue).await.expect("flush");
        assert_eq!(outcome, DeleteOutcome::default());
    }

    #[tokio::test]
    async fn single_request_for_small_batch() {
        let mut queue = MockQueueClient::new();
        queue
            .expect_delete_batch()
            .withf(|entries| {
                entries.len() == 2 && entries[0].receipt_handle == "r-0" && entries[1].id == "m-1"
            })
            .times(1)
            .returning(|entries| Ok(all_deleted(entries)));

        let mut batch = AckBatch::new();
        batch.push(&notification(0));
        batch.push(&notification(1));
        assert_eq!(batch.len(), 2);

        let outcome = batch.flush(&queue).await.expect("flush");
        assert_eq!(outcome.deleted, vec!["m-0", "m-1"]);
    }

    #[tokio::test]
    async fn duplicate_deliveries_collapse_to_latest_receipt() {
        let mut queue = MockQueueClient::new();
        queue
            .expect_delete_batch()
            .withf(|entries| {
                entries.len() == 1 && entries[0].id == "m-1" && entries[0].receipt_handle == "r-b"
            })
            .times(1)
            .returning(|entries| Ok(all_deleted(entries)));

        let mut batch = AckBatch::new();
        for receipt in ["r-a", "r-b"] {
            batch.push(&Notification {
                id: "m-1".to_string(),
                receipt_handle: receipt.to_string(),
                body: String::new(),
            });
        }
        assert_eq!(batch.len(), 1);

        let outcome = batch.flush(&queue).await.expect("flush");
        assert_eq!(outcome.deleted, vec!["m-1"]);
    }

    #[tokio::test]
    async fn large_batches_are_chunked() {
        let mut queue = MockQueueClient::new();
        queue
            .expect_delete_batch()
            .withf(|entries| entries.len() <= MAX_DELETE_BATCH)
            .times(2)
            .returning(|entries| Ok(all_deleted(entries)));

        let mut batch = AckBatch::new();
        for i in 0..13 {
            batch.push(&notification(i));
        }

        let outcome = batch.flush(&queue).await.expect("flush");
        assert_eq!(outcome.deleted.len(), 13);
    }

    #[tokio::test]
    async fn partial_failure_is_reported_not_retried() {
        let mut queue = MockQueueClient::new();
        queue.expect_delete_batch().times(1).returning(|_| {
            Ok(DeleteOutcome {
                deleted: vec!["m-0".into()],
                failed: vec![DeleteFailure {
                    id: "m-1".into(),
                    code: "ReceiptHandleIsInvalid".into(),
                    message: Some("expired".into()),
                }],
            })
        });

        let mut batch = AckBatch::new();
        batch.push(&notification(0));
        batch.push(&notification(1));

        let outcome = batch.flush(&queue).await.expect("flush");
        assert_eq!(outcome.deleted, vec!["m-0"]);
        assert_eq!(outcome.failed[0].id, "m-1");
    }

    #[tokio::test]
    async fn request_failure_is_returned() {
        let mut queue = MockQueueClient::new();
        queue
            .expect_delete_batch()
            .times(1)
            .returning(|_| Err(Error::queue("delete", "access denied")));

        let mut batch = AckBatch::new();
        batch.push(&notification(0));

        let err = batch.flush(&queue).await.unwrap_err();
        assert!(matches!(err, Error::Queue { operation: "delete", .. }));
    }
}
