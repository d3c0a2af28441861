//! The asynchronous work queue seam for counter deletion.
//!
//! Deletion is two-phase: `delete_counter` marks the aggregate and enqueues
//! a [`DeletionJob`]; a queue consumer later feeds the job back into
//! [`crate::service::CounterService::on_deletion_job`]. Delivery is
//! at-least-once, so the handler is idempotent.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Payload of one deletion job: the counter to sweep, plus an optional
/// routing hint for deployments with more than one queue. `None` means the
/// platform's default queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionJob {
    pub counter_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,
    pub enqueued_at: DateTime<Utc>,
}

pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, job: DeletionJob) -> Result<()>;
}

/// In-process queue for tests and single-node deployments. Consumers drain
/// it with [`MemoryQueue::pop`]; redelivery is the consumer's concern.
#[derive(Default)]
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<DeletionJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<DeletionJob> {
        self.jobs.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl WorkQueue for MemoryQueue {
    fn enqueue(&self, job: DeletionJob) -> Result<()> {
        self.jobs.lock().push_back(job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_are_delivered_in_order() {
        let queue = MemoryQueue::new();
        for name in ["a", "b"] {
            queue
                .enqueue(DeletionJob {
                    counter_name: name.to_string(),
                    routing: None,
                    enqueued_at: Utc::now(),
                })
                .unwrap();
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().counter_name, "a");
        assert_eq!(queue.pop().unwrap().counter_name, "b");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn job_payload_round_trips_through_json() {
        let job = DeletionJob {
            counter_name: "visits".to_string(),
            routing: Some("/queues/counter-delete".to_string()),
            enqueued_at: Utc::now(),
        };
        let raw = serde_json::to_vec(&job).unwrap();
        let decoded: DeletionJob = serde_json::from_slice(&raw).unwrap();
        assert_eq!(decoded.counter_name, job.counter_name);
        assert_eq!(decoded.routing, job.routing);
    }
}
