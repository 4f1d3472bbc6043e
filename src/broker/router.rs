//! Load-balancing broker
//!
//! One dispatch loop owns the ready queue. Client frames are only read while
//! at least one worker is idle, so a busy pool pushes back on clients through
//! the bounded inbound channel and TCP. Confirmations never reach a worker.

use crate::broker::ready_queue::{ReadyQueue, WorkerId};
use crate::broker::worker::{Job, Worker, WorkerFrame};
use crate::core::model::{Confirmation, ConfirmationVerb};
use crate::core::pool::ResourcePool;
use crate::infrastructure::config::BrokerConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::log_broker;
use crate::net::{serve_peers, Inbound, PeerId, PeerRegistry};
use crate::protocol::Message;
use crate::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tracing::Level;

pub struct LoadBalancingBroker {
    listener: TcpListener,
    pool: Arc<ResourcePool>,
    metrics: Arc<MetricsCollector>,
    config: BrokerConfig,
}

impl LoadBalancingBroker {
    /// Bind the client endpoint. Bind failure is fatal to the caller.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        pool: Arc<ResourcePool>,
        metrics: Arc<MetricsCollector>,
        config: BrokerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            pool,
            metrics,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run until `shutdown` flips
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        let peers = Arc::new(PeerRegistry::new());
        let (client_tx, client_rx) = mpsc::channel::<Inbound>(self.config.inbound_capacity.max(1));
        tokio::spawn(serve_peers(
            self.listener,
            Arc::clone(&peers),
            client_tx,
            shutdown.clone(),
            "broker",
        ));

        let worker_count = self.config.workers.max(1);
        let (frame_tx, frame_rx) = mpsc::channel::<WorkerFrame>(worker_count * 2);
        let mut workers = HashMap::with_capacity(worker_count);
        for index in 0..worker_count {
            let id = WorkerId(index as u32);
            let (job_tx, job_rx) = mpsc::channel::<Job>(1);
            let worker = Worker::new(id, Arc::clone(&self.pool), Arc::clone(&self.metrics));
            tokio::spawn(worker.run(job_rx, frame_tx.clone()));
            workers.insert(id, job_tx);
        }
        drop(frame_tx);

        let router = Router {
            ready: ReadyQueue::with_capacity(worker_count),
            workers,
            in_flight: HashMap::new(),
            peers,
            pool: self.pool,
            metrics: self.metrics,
        };

        log_broker!(Level::INFO, addr = %addr, workers = worker_count, "Broker started");
        router.serve(frame_rx, client_rx, shutdown).await;
        log_broker!(Level::INFO, "Broker stopped");
        Ok(())
    }
}

struct Router {
    ready: ReadyQueue,
    workers: HashMap<WorkerId, mpsc::Sender<Job>>,
    /// Dispatch time of each busy worker's job
    in_flight: HashMap<WorkerId, Instant>,
    peers: Arc<PeerRegistry>,
    pool: Arc<ResourcePool>,
    metrics: Arc<MetricsCollector>,
}

impl Router {
    /// Worker frames first; a client frame is read only while a worker is ready
    async fn serve(
        mut self,
        mut frame_rx: mpsc::Receiver<WorkerFrame>,
        mut client_rx: mpsc::Receiver<Inbound>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(frame) = frame_rx.recv() => self.on_worker_frame(frame),
                Some(inbound) = client_rx.recv(), if !self.ready.is_empty() => {
                    self.on_client_frame(inbound)
                }
                else => break,
            }
        }
    }

    fn on_worker_frame(&mut self, frame: WorkerFrame) {
        if let Some(client) = frame.client {
            if let Some(started) = self.in_flight.remove(&frame.worker) {
                self.metrics.record_served(started.elapsed());
            }
            if !self.peers.send(client, frame.payload) {
                tracing::debug!(client = %client, worker = %frame.worker, "Client left before reply");
            }
        } else {
            // Readiness without a reply means the job was dropped
            self.in_flight.remove(&frame.worker);
        }

        if let Err(worker) = self.ready.push(frame.worker) {
            tracing::warn!(worker = %worker, "Worker announced readiness twice");
        }
    }

    fn on_client_frame(&mut self, inbound: Inbound) {
        match Message::decode(&inbound.payload) {
            Ok(Message::Confirmation(confirmation)) => self.confirm(inbound.peer, &confirmation),
            Ok(Message::Request(_)) => self.dispatch(inbound),
            Ok(other) => {
                self.metrics.record_unserved();
                tracing::warn!(client = %inbound.peer, kind = other.kind(), "Unexpected message from client");
            }
            Err(e) => {
                self.metrics.record_unserved();
                tracing::warn!(client = %inbound.peer, error = %e, "Dropping malformed client payload");
            }
        }
    }

    /// Forward a request to the longest-idle worker
    fn dispatch(&mut self, inbound: Inbound) {
        let mut job = Job {
            client: inbound.peer,
            payload: inbound.payload,
        };

        while let Some(worker) = self.ready.pop() {
            let Some(sender) = self.workers.get(&worker) else {
                continue;
            };
            match sender.try_send(job) {
                Ok(()) => {
                    self.in_flight.insert(worker, Instant::now());
                    tracing::debug!(client = %inbound.peer, worker = %worker, "Request dispatched");
                    return;
                }
                Err(e) => {
                    log_broker!(Level::WARN, worker = %worker, "Worker unavailable, removed from pool");
                    self.workers.remove(&worker);
                    job = e.into_inner();
                }
            }
        }

        self.metrics.record_unserved();
        log_broker!(Level::WARN, client = %job.client, "No worker available, request dropped");
    }

    /// Accept keeps the allocation; reject releases the echoed amounts.
    /// The acknowledgement is sent even when the release is inconsistent.
    fn confirm(&self, client: PeerId, confirmation: &Confirmation) {
        let accepted = confirmation.verb == ConfirmationVerb::Accept;
        self.metrics.record_confirmation(accepted);

        if let Err(e) = confirmation.apply(&self.pool) {
            self.metrics.record_release_inconsistency();
            log_broker!(
                Level::WARN,
                client = %client,
                program = %confirmation.program,
                error = %e,
                "Release rejected by pool"
            );
        }

        log_broker!(
            Level::INFO,
            client = %client,
            program = %confirmation.program,
            verb = %confirmation.verb,
            stats = %self.pool.statistics(),
            "Confirmation applied"
        );
        self.peers.send(client, confirmation.verb.ack().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::AllocationResult;
    use crate::core::pool::AllocationOutcome;
    use crate::test_utils::{init_test_tracing, sample_request, test_pool};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn router(classrooms: u32, labs: u32) -> (Router, mpsc::UnboundedReceiver<String>, PeerId) {
        init_test_tracing();
        let peers = Arc::new(PeerRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = peers.register(tx);
        let router = Router {
            ready: ReadyQueue::with_capacity(2),
            workers: HashMap::new(),
            in_flight: HashMap::new(),
            peers,
            pool: test_pool(classrooms, labs),
            metrics: Arc::new(MetricsCollector::new()),
        };
        (router, rx, peer)
    }

    #[test]
    fn test_accept_never_mutates_pool() {
        let (router, mut rx, peer) = router(10, 4);
        let outcome = router.pool.allocate(5, 2);
        let after = router.pool.snapshot();

        let confirmation = Confirmation::new(
            ConfirmationVerb::Accept,
            "Sistemas",
            AllocationResult::from_outcome(outcome, "Sistemas"),
        );
        router.confirm(peer, &confirmation);

        assert_eq!(router.pool.snapshot(), after);
        assert_eq!(rx.try_recv().unwrap(), "CONFIRMADO ACEPTACION");
    }

    #[test]
    fn test_inconsistent_reject_still_acknowledged() {
        let (router, mut rx, peer) = router(10, 4);
        let before = router.pool.snapshot();

        // Mobile classrooms were never granted by this pool
        let confirmation = Confirmation::new(
            ConfirmationVerb::Reject,
            "Civil",
            AllocationResult::from_outcome(AllocationOutcome::new(0, 3, 1), "Civil"),
        );
        router.confirm(peer, &confirmation);

        assert_eq!(router.pool.snapshot(), before);
        assert_eq!(rx.try_recv().unwrap(), "CONFIRMADO RECHAZO");
        assert_eq!(router.metrics.snapshot().release_inconsistencies, 1);
    }

    #[test]
    fn test_malformed_payload_counted_and_dropped() {
        let (mut router, mut rx, peer) = router(10, 4);
        router.on_client_frame(Inbound {
            peer,
            payload: r#"{"unknown": true}"#.to_string(),
        });

        assert!(rx.try_recv().is_err());
        assert_eq!(router.metrics.snapshot().unserved, 1);
    }

    #[test]
    fn test_dispatch_picks_longest_idle_worker() {
        let (mut router, _rx, peer) = router(10, 4);
        let (tx0, mut rx0) = mpsc::channel(1);
        let (tx1, mut rx1) = mpsc::channel(1);
        router.workers.insert(WorkerId(0), tx0);
        router.workers.insert(WorkerId(1), tx1);
        router.ready.push(WorkerId(1)).unwrap();
        router.ready.push(WorkerId(0)).unwrap();

        router.dispatch(Inbound {
            peer,
            payload: "{}".to_string(),
        });

        assert_eq!(rx1.try_recv().unwrap().client, peer);
        assert!(rx0.try_recv().is_err());
        assert_eq!(router.ready.pop(), Some(WorkerId(0)));
    }

    #[test]
    fn test_reply_forwarded_and_worker_requeued() {
        let (mut router, mut rx, peer) = router(10, 4);
        router.in_flight.insert(WorkerId(0), Instant::now());

        router.on_worker_frame(WorkerFrame {
            worker: WorkerId(0),
            client: Some(peer),
            payload: "result".to_string(),
        });

        assert_eq!(rx.try_recv().unwrap(), "result");
        assert_eq!(router.ready.pop(), Some(WorkerId(0)));
        assert_eq!(router.metrics.snapshot().served, 1);
    }

    #[tokio::test]
    async fn test_client_frames_wait_for_a_ready_worker() {
        let (mut router, mut replies, peer) = router(10, 4);
        let (job_tx, mut job_rx) = mpsc::channel(1);
        router.workers.insert(WorkerId(0), job_tx);

        let (frame_tx, frame_rx) = mpsc::channel(4);
        let (client_tx, client_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let serving = tokio::spawn(router.serve(frame_rx, client_rx, shutdown_rx));

        let request = Message::Request(sample_request(1, 1, 1)).encode().unwrap();
        let inbound = || Inbound {
            peer,
            payload: request.clone(),
        };

        // No worker ready yet: the frame stays in the channel
        client_tx.send(inbound()).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(client_tx.capacity(), 3);
        assert!(job_rx.try_recv().is_err());

        frame_tx
            .send(WorkerFrame {
                worker: WorkerId(0),
                client: None,
                payload: "READY".to_string(),
            })
            .await
            .unwrap();
        let job = timeout(Duration::from_secs(1), job_rx.recv()).await.unwrap().unwrap();
        assert_eq!(job.client, peer);

        // The only worker is busy again
        client_tx.send(inbound()).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(client_tx.capacity(), 3);
        assert!(job_rx.try_recv().is_err());

        frame_tx
            .send(WorkerFrame {
                worker: WorkerId(0),
                client: Some(peer),
                payload: "result".to_string(),
            })
            .await
            .unwrap();
        let job = timeout(Duration::from_secs(1), job_rx.recv()).await.unwrap().unwrap();
        assert_eq!(job.client, peer);
        assert_eq!(replies.recv().await.unwrap(), "result");
        assert_eq!(client_tx.capacity(), 4);

        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(1), serving).await.unwrap().unwrap();
    }
}
