//! Apply job registry.
//!
//! Tracks running and finished apply jobs: one opaque job id per invocation,
//! at most one in-flight apply per mapping set, a cooperative cancellation
//! flag checked between batches, and a broadcast channel fanning progress
//! events out to HTTP subscribers.
//!
//! The registry is also where the event-stream guarantees are enforced:
//! `current` never decreases for a job, and only the first terminal event
//! (`Completed` or `Error`) is recorded and forwarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::HarmonizerError;
use crate::progress::{ApplyEvent, ApplyProgressReporter};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle phase of an apply job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "message")]
pub enum JobPhase {
    Running,
    Completed(String),
    Failed(String),
}

impl JobPhase {
    fn is_terminal(&self) -> bool {
        !matches!(self, JobPhase::Running)
    }
}

/// Snapshot of one job, served by `GET /apply-jobs/{id}`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub mapping_set_id: String,
    pub current: u64,
    pub total: u64,
    #[serde(flatten)]
    pub phase: JobPhase,
}

struct JobEntry {
    snapshot: JobSnapshot,
    events: broadcast::Sender<ApplyEvent>,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobEntry>,
    in_flight: HashMap<String, String>,
}

/// Registry of apply jobs. Shared between the CLI/server and the applier.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new apply job for the mapping set.
    ///
    /// Fails with [`HarmonizerError::ApplyInFlight`] while another job for
    /// the same set is still running; concurrent applies of one set would
    /// race their own partial rewrites.
    pub fn start(self: &Arc<Self>, mapping_set_id: &str) -> Result<ApplyJob, HarmonizerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_flight.contains_key(mapping_set_id) {
            return Err(HarmonizerError::ApplyInFlight(mapping_set_id.to_string()));
        }

        let job_id = Uuid::new_v4().to_string();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = Arc::new(AtomicBool::new(false));

        inner.in_flight.insert(mapping_set_id.to_string(), job_id.clone());
        inner.jobs.insert(
            job_id.clone(),
            JobEntry {
                snapshot: JobSnapshot {
                    job_id: job_id.clone(),
                    mapping_set_id: mapping_set_id.to_string(),
                    current: 0,
                    total: 0,
                    phase: JobPhase::Running,
                },
                events,
                cancel: cancel.clone(),
            },
        );

        Ok(ApplyJob {
            job_id,
            mapping_set_id: mapping_set_id.to_string(),
            cancel,
            registry: Arc::clone(self),
        })
    }

    /// Request cooperative cancellation. Returns false for unknown jobs.
    pub fn cancel(&self, job_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.jobs.get(job_id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self, job_id: &str) -> Option<JobSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.get(job_id).map(|entry| entry.snapshot.clone())
    }

    /// Subscribe to a job's event stream. Events published before the
    /// subscription are reflected in the snapshot instead.
    pub fn subscribe(&self, job_id: &str) -> Option<broadcast::Receiver<ApplyEvent>> {
        let inner = self.inner.lock().unwrap();
        inner.jobs.get(job_id).map(|entry| entry.events.subscribe())
    }

    fn record(&self, job_id: &str, event: &ApplyEvent) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            return;
        };
        if entry.snapshot.phase.is_terminal() {
            // Terminal events are delivered exactly once; late stragglers
            // are dropped.
            return;
        }
        match event {
            ApplyEvent::Progress { current, total } => {
                entry.snapshot.current = entry.snapshot.current.max(*current);
                entry.snapshot.total = *total;
            }
            ApplyEvent::Completed { message } => {
                entry.snapshot.phase = JobPhase::Completed(message.clone());
            }
            ApplyEvent::Error { message } => {
                entry.snapshot.phase = JobPhase::Failed(message.clone());
            }
        }
        // Receivers may have gone away; that is not an error.
        let _ = entry.events.send(event.clone());
    }

    fn release(&self, job: &ApplyJob) {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_flight.get(&job.mapping_set_id) == Some(&job.job_id) {
            inner.in_flight.remove(&job.mapping_set_id);
        }
        if let Some(entry) = inner.jobs.get_mut(&job.job_id) {
            if !entry.snapshot.phase.is_terminal() {
                // The applier died without a terminal event (panic or early
                // return). Close the stream so subscribers are not left
                // hanging.
                let message = "apply ended unexpectedly".to_string();
                entry.snapshot.phase = JobPhase::Failed(message.clone());
                let _ = entry.events.send(ApplyEvent::Error { message });
            }
        }
    }
}

/// Handle for one running apply. Dropping it releases the in-flight slot
/// for its mapping set.
pub struct ApplyJob {
    job_id: String,
    mapping_set_id: String,
    cancel: Arc<AtomicBool>,
    registry: Arc<JobRegistry>,
}

impl ApplyJob {
    pub fn id(&self) -> &str {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Reporter that records events in the registry and fans them out to
    /// subscribers, on top of forwarding to `inner` (the CLI's stderr
    /// reporter, typically).
    pub fn reporter(&self, inner: Box<dyn ApplyProgressReporter>) -> JobReporter {
        JobReporter {
            job_id: self.job_id.clone(),
            registry: Arc::clone(&self.registry),
            inner,
        }
    }
}

impl std::fmt::Debug for ApplyJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyJob")
            .field("job_id", &self.job_id)
            .field("mapping_set_id", &self.mapping_set_id)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Drop for ApplyJob {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        registry.release(self);
    }
}

/// Composite reporter: registry bookkeeping plus an inner reporter.
pub struct JobReporter {
    job_id: String,
    registry: Arc<JobRegistry>,
    inner: Box<dyn ApplyProgressReporter>,
}

impl ApplyProgressReporter for JobReporter {
    fn report(&self, event: &ApplyEvent) {
        self.registry.record(&self.job_id, event);
        self.inner.report(event);
    }
}
