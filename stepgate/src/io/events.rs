//! Best-effort job/step change notifications.
//!
//! Every subscriber owns a bounded queue. Publishing never blocks: when a
//! subscriber's queue is full the event is dropped for that subscriber, and
//! subscribers whose receiver is gone are pruned.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::core::types::JobStatus;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    JobCreated {
        job_id: String,
    },
    JobUpdated {
        job_id: String,
        status: JobStatus,
    },
    StepsReplaced {
        job_id: String,
        step_count: usize,
    },
    StepApproved {
        job_id: String,
        step_id: String,
    },
    AttemptRecorded {
        job_id: String,
        step_id: String,
        attempt_id: String,
        accepted: bool,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::JobCreated { job_id }
            | JobEvent::JobUpdated { job_id, .. }
            | JobEvent::StepsReplaced { job_id, .. }
            | JobEvent::StepApproved { job_id, .. }
            | JobEvent::AttemptRecorded { job_id, .. } => job_id,
        }
    }
}

#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<JobEvent>>>,
    dropped: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> mpsc::Receiver<JobEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber without waiting.
    pub fn publish(&self, event: JobEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(job_id = event.job_id(), "subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Total events dropped because a subscriber queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
