//! Stateless broker worker
//!
//! A worker announces `READY`, then answers one job at a time. Correctness
//! under concurrency comes from the pool's critical section; workers never
//! coordinate with each other.

use crate::broker::ready_queue::WorkerId;
use crate::core::model::{AllocationResult, Request};
use crate::core::pool::ResourcePool;
use crate::infrastructure::metrics::MetricsCollector;
use crate::net::PeerId;
use crate::protocol::{Message, READY};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Request forwarded by the router, tagged with the client to answer
#[derive(Debug, Clone)]
pub struct Job {
    pub client: PeerId,
    pub payload: String,
}

/// Frame from a worker to the router
///
/// `client` is `None` for a readiness announcement.
#[derive(Debug, Clone)]
pub struct WorkerFrame {
    pub worker: WorkerId,
    pub client: Option<PeerId>,
    pub payload: String,
}

impl WorkerFrame {
    fn ready(worker: WorkerId) -> Self {
        Self {
            worker,
            client: None,
            payload: READY.to_string(),
        }
    }
}

pub struct Worker {
    id: WorkerId,
    pool: Arc<ResourcePool>,
    metrics: Arc<MetricsCollector>,
}

impl Worker {
    pub fn new(id: WorkerId, pool: Arc<ResourcePool>, metrics: Arc<MetricsCollector>) -> Self {
        Self { id, pool, metrics }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Allocate for one request and wrap the outcome
    pub fn handle(&self, request: &Request) -> AllocationResult {
        let outcome = self.pool.allocate(request.classrooms, request.labs);
        self.metrics.record_outcome(outcome.is_denied());

        tracing::debug!(
            worker = %self.id,
            program = %request.program,
            classrooms = request.classrooms,
            labs = request.labs,
            denied = outcome.is_denied(),
            "Request handled"
        );

        AllocationResult::from_outcome(outcome, &request.program)
    }

    /// Serve jobs until the router goes away
    pub async fn run(self, mut jobs: mpsc::Receiver<Job>, frames: mpsc::Sender<WorkerFrame>) {
        if frames.send(WorkerFrame::ready(self.id)).await.is_err() {
            return;
        }

        while let Some(job) = jobs.recv().await {
            let frame = match self.process(&job) {
                Some(payload) => WorkerFrame {
                    worker: self.id,
                    client: Some(job.client),
                    payload,
                },
                None => WorkerFrame::ready(self.id),
            };
            if frames.send(frame).await.is_err() {
                break;
            }
        }

        tracing::debug!(worker = %self.id, "Worker stopped");
    }

    /// Reply payload, or `None` if the job is not a request
    fn process(&self, job: &Job) -> Option<String> {
        let request = match Message::decode(&job.payload) {
            Ok(Message::Request(request)) => request,
            Ok(other) => {
                tracing::warn!(worker = %self.id, kind = other.kind(), "Worker got a non-request job");
                self.metrics.record_failed();
                return None;
            }
            Err(e) => {
                tracing::warn!(worker = %self.id, error = %e, "Worker could not decode job");
                self.metrics.record_failed();
                return None;
            }
        };

        let result = self.handle(&request);
        match Message::Result(result).encode() {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::error!(worker = %self.id, error = %e, "Failed to encode result");
                self.metrics.record_failed();
                None
            }
        }
    }
}
