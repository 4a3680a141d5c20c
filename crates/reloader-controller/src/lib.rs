//! SQSSecret controller
//!
//! Drains secret rotation notifications from an SQS queue and restarts the
//! deployments listed on each SQSSecret whose secret got a new value.

#![deny(missing_docs)]

pub mod ack;
pub mod controller;
pub mod notification;
pub mod queue;
pub mod restart;

pub use controller::{error_policy, reconcile, run_cycle, Context, CycleReport};
pub use notification::{classify, IgnoreReason, Notification, RotationEvent, Verdict};
pub use queue::{QueueClient, SqsQueueClient};
pub use restart::{restart_workloads, KubeWorkloadClient, WorkloadClient};
