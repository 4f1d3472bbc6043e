//! Asynchronous client for the allocation server
//!
//! One link at a time per client. Three tasks run behind it: a writer
//! draining the outbound channel, a receive loop resolving pending slots and
//! control waiters, and a heartbeat timer that probes a quiet link and flips
//! the reachable flag when a probe goes unanswered.
//!
//! When the link fails on send or receive it is torn down and redialled in
//! the background with the configured retries and backoff. Once those run
//! out the server stays unreachable until `reconnect` is called.

use crate::client::session::{
    ClientCounters, ClientStats, ControlWaiters, LinkHealth, PendingRequests, RequestId,
};
use crate::core::model::{AllocationResult, Confirmation, ConfirmationVerb, Request};
use crate::infrastructure::config::ClientConfig;
use crate::log_client;
use crate::net::{read_frame, write_frame};
use crate::protocol::{Message, ProtocolError, HEARTBEAT};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, timeout, MissedTickBehavior};
use tracing::Level;

/// Returned by `confirm_allocation` when no acknowledgement arrives
pub const CONFIRMATION_ERROR: &str = "ERROR_CONFIRMACION";

/// Semester every client starts in
const INITIAL_SEMESTER: u32 = 1;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Server unreachable")]
    Unreachable,

    #[error("No reply within timeout")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection closed")]
    Closed,

    #[error("Server refused semester {0}")]
    SemesterRejected(u32),
}

/// State shared between the caller and the background tasks
struct Shared {
    identity: String,
    config: ClientConfig,
    pending: Mutex<PendingRequests>,
    control: Mutex<ControlWaiters>,
    health: Mutex<LinkHealth>,
    counters: ClientCounters,
    connected: AtomicBool,
    /// Bumped on every teardown; tasks holding an older value are stale
    link: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Held for the whole dial sequence
    dial: tokio::sync::Mutex<()>,
    shutdown: watch::Receiver<bool>,
}

impl Shared {
    fn is_current(&self, link: u64) -> bool {
        self.link.load(Ordering::Acquire) == link
    }

    fn on_frame(&self, payload: &str) {
        self.health.lock().record_received(Instant::now());
        self.counters.record_received();

        let message = match Message::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                log_client!(Level::WARN, client = %self.identity, error = %e, "Undecodable reply dropped");
                return;
            }
        };

        match message {
            m if m.is_liveness() => {}
            Message::Result(result) => {
                if let Err(late) = self.pending.lock().resolve_oldest(result) {
                    tracing::debug!(
                        target: "client",
                        client = %self.identity,
                        summary = %late.summary,
                        "Late result discarded"
                    );
                }
            }
            reply @ (Message::Ack(_)
            | Message::SemesterResetOk(_)
            | Message::SemesterUnchanged(_)
            | Message::FailureSimulated
            | Message::ReplicaActivated
            | Message::ReplicaNotEnabled) => {
                if let Err(late) = self.control.lock().resolve_oldest(reply) {
                    tracing::debug!(target: "client", client = %self.identity, kind = late.kind(), "Late control reply discarded");
                }
            }
            other => {
                log_client!(Level::WARN, client = %self.identity, kind = other.kind(), "Unexpected message from server");
            }
        }
    }

    /// Tear down `link` if it is still the current one
    ///
    /// Dropping the outbound sender ends the writer, which closes the socket.
    /// Every waiting caller observes `Closed`.
    fn close_link(&self, link: u64) -> bool {
        if self
            .link
            .compare_exchange(link, link + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.connected.store(false, Ordering::Release);
        *self.outbound.lock() = None;
        self.health.lock().mark_unreachable();
        self.pending.lock().clear();
        self.control.lock().clear();
        true
    }

    /// Close `link` and redial in the background unless shutting down
    fn link_lost(self: &Arc<Self>, link: u64) {
        if !self.close_link(link) || *self.shutdown.borrow() {
            return;
        }

        log_client!(Level::WARN, client = %self.identity, "Link lost, reconnecting");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.establish().await;
        });
    }

    /// Dial with bounded retries and start the link tasks
    ///
    /// True when a link is up, including one another caller just opened.
    async fn establish(self: &Arc<Self>) -> bool {
        let _dialing = self.dial.lock().await;
        if self.connected.load(Ordering::Acquire) {
            return true;
        }

        let addr = self.config.server_addr();
        let attempts = self.config.retries.max(1);

        for attempt in 1..=attempts {
            if *self.shutdown.borrow() {
                return false;
            }

            match open_link(&addr, self.config.handshake_timeout()).await {
                Ok(stream) => {
                    self.start_link(stream);
                    log_client!(Level::INFO, client = %self.identity, server = %addr, attempt, "Connected");
                    return true;
                }
                Err(e) => {
                    self.counters.record_connection_error();
                    log_client!(
                        Level::WARN,
                        client = %self.identity,
                        server = %addr,
                        attempt,
                        attempts,
                        error = %e,
                        "Connection attempt failed"
                    );
                    if attempt < attempts {
                        sleep(self.config.backoff(attempt)).await;
                    }
                }
            }
        }

        self.health.lock().mark_unreachable();
        log_client!(Level::ERROR, client = %self.identity, server = %addr, "Server unreachable, giving up");
        false
    }

    fn start_link(self: &Arc<Self>, stream: TcpStream) {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let link = self.link.load(Ordering::Acquire);

        *self.outbound.lock() = Some(tx);
        self.health.lock().record_received(Instant::now());
        self.connected.store(true, Ordering::Release);

        tokio::spawn(write_loop(writer, rx, Arc::clone(self), link));
        tokio::spawn(receive_loop(reader, Arc::clone(self), link));
        tokio::spawn(heartbeat_loop(Arc::clone(self), link));
    }
}

/// Pending reply to one request
pub struct RequestHandle {
    id: RequestId,
    rx: oneshot::Receiver<AllocationResult>,
    shared: Arc<Shared>,
    limit: Duration,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait for the result; a timeout cancels the slot
    pub async fn wait(self) -> Result<AllocationResult, ClientError> {
        let RequestHandle {
            id,
            rx,
            shared,
            limit,
        } = self;

        match timeout(limit, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                shared.pending.lock().cancel(id);
                log_client!(Level::WARN, client = %shared.identity, request = %id, "Request timed out");
                Err(ClientError::Timeout)
            }
        }
    }
}

pub struct AsyncClient {
    shared: Arc<Shared>,
    semester: AtomicU32,
    shutdown: watch::Sender<bool>,
}

impl AsyncClient {
    /// Connect with bounded retries
    ///
    /// Never fails: when every attempt fails the client is returned with
    /// the reachable flag cleared and every call answers `Unreachable`.
    pub async fn connect(faculty: &str, config: ClientConfig) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            identity: client_identity(faculty),
            pending: Mutex::new(PendingRequests::new()),
            control: Mutex::new(ControlWaiters::default()),
            health: Mutex::new(LinkHealth::new(
                config.heartbeat_interval(),
                config.timeout(),
                Instant::now(),
            )),
            counters: ClientCounters::default(),
            connected: AtomicBool::new(false),
            link: AtomicU64::new(0),
            outbound: Mutex::new(None),
            dial: tokio::sync::Mutex::new(()),
            shutdown: shutdown_rx,
            config,
        });

        shared.establish().await;

        Self {
            shared,
            semester: AtomicU32::new(INITIAL_SEMESTER),
            shutdown,
        }
    }

    /// Drop the current link, if any, and dial again
    ///
    /// Outstanding requests are abandoned. True once a new link is up.
    pub async fn reconnect(&self) -> bool {
        {
            let _dialing = self.shared.dial.lock().await;
            self.shared.close_link(self.shared.link.load(Ordering::Acquire));
        }
        log_client!(Level::INFO, client = %self.shared.identity, "Reconnecting");
        self.shared.establish().await
    }

    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    #[inline]
    pub fn is_server_reachable(&self) -> bool {
        self.shared.health.lock().is_reachable()
    }

    pub fn current_semester(&self) -> u32 {
        self.semester.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.counters.snapshot()
    }

    pub fn reset_stats(&self) {
        self.shared.counters.reset();
    }

    /// Requests sent and not yet answered or cancelled
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Abandon every outstanding request and control call
    ///
    /// Their waiters return `Closed`; a reply arriving later is discarded.
    /// Returns how many were abandoned.
    pub fn cancel_pending(&self) -> usize {
        let requests = self.shared.pending.lock().clear();
        let controls = self.shared.control.lock().clear();
        if requests + controls > 0 {
            log_client!(
                Level::INFO,
                client = %self.shared.identity,
                requests,
                controls,
                "Pending requests cancelled"
            );
        }
        requests + controls
    }

    /// Issue a request without waiting for its result
    ///
    /// A request for another semester first resets the server to it.
    pub async fn send_request_async(&self, request: &Request) -> Result<RequestHandle, ClientError> {
        if request.semester != self.current_semester() && !self.reset_semester(request.semester).await {
            return Err(ClientError::SemesterRejected(request.semester));
        }

        let outbound = self.outbound()?;
        let payload = Message::Request(request.clone()).encode()?;

        // Register and enqueue under one lock so slot order matches wire order
        let (id, rx) = {
            let mut pending = self.shared.pending.lock();
            let (id, rx) = pending.register();
            if outbound.send(payload).is_err() {
                pending.cancel(id);
                return Err(ClientError::Closed);
            }
            (id, rx)
        };
        self.shared.counters.record_sent();

        tracing::debug!(
            target: "client",
            client = %self.shared.identity,
            request = %id,
            program = %request.program,
            "Request sent"
        );

        Ok(RequestHandle {
            id,
            rx,
            shared: Arc::clone(&self.shared),
            limit: self.shared.config.timeout(),
        })
    }

    /// Send and wait; `None` when no result arrives
    pub async fn send_request_sync(&self, request: &Request) -> Option<AllocationResult> {
        let outcome = match self.send_request_async(request).await {
            Ok(handle) => handle.wait().await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => Some(result),
            Err(e) => {
                log_client!(Level::WARN, client = %self.shared.identity, program = %request.program, error = %e, "No result for request");
                None
            }
        }
    }

    /// Accept or reject a result; returns the server's acknowledgement text
    pub async fn confirm_allocation(
        &self,
        request: &Request,
        result: &AllocationResult,
        accept: bool,
    ) -> String {
        let verb = if accept {
            ConfirmationVerb::Accept
        } else {
            ConfirmationVerb::Reject
        };
        let confirmation = Confirmation::new(verb, request.program.clone(), result.clone());

        match self.control(Message::Confirmation(confirmation)).await {
            Ok(Message::Ack(acked)) => acked.ack().to_string(),
            Ok(other) => {
                log_client!(Level::WARN, client = %self.shared.identity, kind = other.kind(), "Unexpected confirmation reply");
                CONFIRMATION_ERROR.to_string()
            }
            Err(e) => {
                log_client!(Level::WARN, client = %self.shared.identity, error = %e, "Confirmation failed");
                CONFIRMATION_ERROR.to_string()
            }
        }
    }

    /// Move the server to `semester`; true if it is now current
    pub async fn reset_semester(&self, semester: u32) -> bool {
        if semester == self.current_semester() {
            return true;
        }

        match self.control(Message::ResetSemester(semester)).await {
            Ok(Message::SemesterResetOk(n)) | Ok(Message::SemesterUnchanged(n)) if n == semester => {
                self.semester.store(semester, Ordering::Release);
                log_client!(Level::INFO, client = %self.shared.identity, semester, "Semester reset");
                true
            }
            Ok(other) => {
                log_client!(Level::WARN, client = %self.shared.identity, semester, kind = other.kind(), "Semester reset refused");
                false
            }
            Err(e) => {
                log_client!(Level::WARN, client = %self.shared.identity, semester, error = %e, "Semester reset failed");
                false
            }
        }
    }

    pub async fn simulate_failure(&self) -> bool {
        matches!(
            self.control(Message::SimulateFailure).await,
            Ok(Message::FailureSimulated)
        )
    }

    /// False when the server runs without a replica
    pub async fn activate_replica(&self) -> bool {
        matches!(
            self.control(Message::ActivateReplica).await,
            Ok(Message::ReplicaActivated)
        )
    }

    /// Stop the background tasks and drop the link
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Sender of the current link; none while disconnected
    fn outbound(&self) -> Result<mpsc::UnboundedSender<String>, ClientError> {
        self.shared
            .outbound
            .lock()
            .clone()
            .ok_or(ClientError::Unreachable)
    }

    /// One control message and its reply
    async fn control(&self, message: Message) -> Result<Message, ClientError> {
        let outbound = self.outbound()?;
        let payload = message.encode()?;

        let rx = {
            let mut control = self.shared.control.lock();
            let rx = control.register();
            outbound.send(payload).map_err(|_| ClientError::Closed)?;
            rx
        };
        self.shared.counters.record_sent();

        match timeout(self.shared.config.timeout(), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// `FAC_<faculty>_<8 hex>`
fn client_identity(faculty: &str) -> String {
    let name: String = faculty
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("FAC_{}_{}", name, suffix)
}

/// TCP connect plus PING_SERVER/PONG handshake
async fn open_link(addr: &str, limit: Duration) -> Result<TcpStream, ClientError> {
    let mut stream = timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(|e| ClientError::Transport(e.to_string()))?;
    let _ = stream.set_nodelay(true);

    write_frame(&mut stream, &Message::Ping.encode()?).await?;
    let reply = timeout(limit, read_frame(&mut stream))
        .await
        .map_err(|_| ClientError::Timeout)??;

    match reply {
        Some(payload) if Message::decode(&payload)? == Message::Pong => Ok(stream),
        Some(_) => Err(ClientError::Transport("handshake answered without PONG".to_string())),
        None => Err(ClientError::Closed),
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
    shared: Arc<Shared>,
    link: u64,
) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        let payload = tokio::select! {
            _ = shutdown.changed() => break,
            payload = rx.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        if let Err(e) = write_frame(&mut writer, &payload).await {
            shared.counters.record_connection_error();
            log_client!(Level::WARN, client = %shared.identity, error = %e, "Send failed");
            shared.link_lost(link);
            break;
        }
    }
}

async fn receive_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>, link: u64) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = read_frame(&mut reader) => frame,
        };
        if !shared.is_current(link) {
            return;
        }

        match frame {
            Ok(Some(payload)) => shared.on_frame(&payload),
            Ok(None) => {
                log_client!(Level::WARN, client = %shared.identity, "Server closed the connection");
                break;
            }
            Err(e) => {
                shared.counters.record_connection_error();
                log_client!(Level::WARN, client = %shared.identity, error = %e, "Receive failed");
                break;
            }
        }
    }

    shared.link_lost(link);
}

async fn heartbeat_loop(shared: Arc<Shared>, link: u64) {
    let mut shutdown = shared.shutdown.clone();
    let period = shared
        .config
        .heartbeat_interval()
        .min(shared.config.timeout())
        .max(Duration::from_millis(1));
    let mut tick = interval_at(tokio::time::Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }
        if !shared.is_current(link) {
            break;
        }

        let now = Instant::now();
        let (lost, probe) = {
            let mut health = shared.health.lock();
            let lost = health.evaluate(now);
            let probe = health.needs_heartbeat(now);
            if probe {
                health.record_heartbeat_sent(now);
            }
            (lost, probe)
        };

        if lost {
            log_client!(Level::WARN, client = %shared.identity, "Heartbeat unanswered, server marked unreachable");
        }
        if probe {
            let sent = match shared.outbound.lock().as_ref() {
                Some(outbound) => outbound.send(HEARTBEAT.to_string()).is_ok(),
                None => false,
            };
            if !sent {
                break;
            }
            shared.counters.record_sent();
        }
    }
}
