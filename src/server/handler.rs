//! Per-message dispatch for the asynchronous server
//!
//! `Dispatcher::handle` decodes a payload once and answers it with a single
//! `match`. It is synchronous and shared by every worker of the pool.

use crate::core::model::{AllocationResult, Confirmation, ConfirmationVerb, Request};
use crate::core::pool::{Inventory, ResourcePool};
use crate::infrastructure::metrics::MetricsCollector;
use crate::log_server;
use crate::net::{PeerId, PeerRegistry};
use crate::protocol::{Message, ProtocolError};
use crate::server::journal::{EventJournal, JournalRecord};
use crate::server::liveness::ClientRegistry;
use crate::server::state::{Failover, FailoverState, SemesterChange, SemesterClock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::Level;

/// Snapshot of the server for monitoring
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub semester: u32,
    pub failover: FailoverState,
    pub role: &'static str,
    pub connected_clients: usize,
    pub active_clients: usize,
    pub unique_clients: u64,
    pub inventory: Inventory,
    pub archived_semesters: BTreeMap<u32, String>,
}

pub struct Dispatcher {
    pool: Arc<ResourcePool>,
    clock: SemesterClock,
    failover: Arc<Failover>,
    clients: ClientRegistry,
    peers: Arc<PeerRegistry>,
    journal: Option<EventJournal>,
    metrics: Arc<MetricsCollector>,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<ResourcePool>,
        failover: Arc<Failover>,
        clients: ClientRegistry,
        peers: Arc<PeerRegistry>,
        journal: Option<EventJournal>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            pool,
            clock: SemesterClock::default(),
            failover,
            clients,
            peers,
            journal,
            metrics,
        }
    }

    /// Answer one inbound payload
    ///
    /// Every message refreshes the sender's liveness record, even one that
    /// fails to decode.
    pub fn handle(&self, peer: PeerId, payload: &str) -> Result<Message, ProtocolError> {
        self.clients.record_contact(peer, Instant::now());

        let reply = match Message::decode(payload)? {
            Message::Ping | Message::Heartbeat => Message::Pong,
            Message::ResetSemester(semester) => match self.reset_semester(semester) {
                SemesterChange::Reset { .. } => Message::SemesterResetOk(semester),
                SemesterChange::Unchanged => Message::SemesterUnchanged(self.clock.current()),
            },
            Message::SimulateFailure => {
                self.failover.simulate_failure();
                log_server!(Level::WARN, peer = %peer, state = %self.failover.state(), "Failure simulated");
                Message::FailureSimulated
            }
            Message::ActivateReplica => {
                if self.failover.activate_replica() {
                    log_server!(Level::INFO, peer = %peer, "Replica activated manually");
                    Message::ReplicaActivated
                } else {
                    Message::ReplicaNotEnabled
                }
            }
            Message::Confirmation(confirmation) => self.confirm(peer, &confirmation),
            Message::Request(request) => Message::Result(self.allocate(peer, &request)),
            other => return Err(ProtocolError::Unexpected(other.kind())),
        };

        Ok(reply)
    }

    fn reset_semester(&self, semester: u32) -> SemesterChange {
        let change = self.clock.reset_to(semester, &self.pool);
        if let SemesterChange::Reset { previous, archived } = change {
            log_server!(
                Level::INFO,
                previous,
                semester,
                archived = %archived,
                role = self.failover.state().label(),
                "Semester reset, resources restored"
            );
        }
        change
    }

    fn allocate(&self, peer: PeerId, request: &Request) -> AllocationResult {
        let started = Instant::now();

        if request.semester != self.clock.current() {
            self.reset_semester(request.semester);
        }

        let outcome = self.pool.allocate(request.classrooms, request.labs);
        let role = self.failover.state().label();

        log_server!(
            Level::INFO,
            peer = %peer,
            program = %request.program,
            faculty = %request.faculty,
            classrooms = request.classrooms,
            labs = request.labs,
            denied = outcome.is_denied(),
            role,
            stats = %self.pool.statistics(),
            "Request processed"
        );

        if let Some(journal) = &self.journal {
            journal.record(&JournalRecord::new(
                peer,
                request,
                outcome,
                self.clock.current(),
                role,
            ));
        }

        self.metrics.record_outcome(outcome.is_denied());
        self.metrics.record_served(started.elapsed());

        AllocationResult::from_outcome(outcome, &request.program)
    }

    /// Same semantics as the broker; an inconsistent release is logged only
    fn confirm(&self, peer: PeerId, confirmation: &Confirmation) -> Message {
        let accepted = confirmation.verb == ConfirmationVerb::Accept;
        self.metrics.record_confirmation(accepted);

        match confirmation.apply(&self.pool) {
            Ok(()) => log_server!(
                Level::INFO,
                peer = %peer,
                program = %confirmation.program,
                verb = %confirmation.verb,
                stats = %self.pool.statistics(),
                "Confirmation applied"
            ),
            Err(e) => {
                self.metrics.record_release_inconsistency();
                log_server!(Level::WARN, peer = %peer, program = %confirmation.program, error = %e, "Release rejected by pool");
            }
        }

        Message::Ack(confirmation.verb)
    }

    /// Evict silent clients and return them
    pub fn evict_stale(&self, now: Instant) -> Vec<PeerId> {
        let evicted = self.clients.evict_stale(now);
        for peer in &evicted {
            log_server!(Level::INFO, peer = %peer, "Client evicted after timeout");
        }
        evicted
    }

    /// Failover monitor tick: promote a principal left down
    pub fn monitor_failover(&self) -> bool {
        let promoted = self.failover.promote_if_down();
        if promoted {
            log_server!(Level::WARN, state = %self.failover.state(), "Principal down, replica promoted by monitor");
        }
        promoted
    }

    pub fn status(&self) -> ServerStatus {
        let failover = self.failover.state();
        ServerStatus {
            semester: self.clock.current(),
            failover,
            role: failover.label(),
            connected_clients: self.peers.len(),
            active_clients: self.clients.active(),
            unique_clients: self.clients.unique_clients(),
            inventory: self.pool.snapshot(),
            archived_semesters: self.clock.archive(),
        }
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    #[inline]
    pub fn pool(&self) -> &Arc<ResourcePool> {
        &self.pool
    }
}
