//! Asynchronous server
//!
//! A single endpoint serves many clients. Each inbound frame is handled on a
//! blocking worker bounded by a semaphore; a panic or decode failure in one
//! handler never touches another client's request. A background sweep evicts
//! silent clients and, with replicas enabled, runs the failover monitor.

use crate::core::pool::ResourcePool;
use crate::infrastructure::config::AsyncServerConfig;
use crate::infrastructure::metrics::MetricsCollector;
use crate::log_server;
use crate::net::{serve_peers, Inbound, PeerRegistry};
use crate::server::handler::Dispatcher;
use crate::server::journal::EventJournal;
use crate::server::liveness::ClientRegistry;
use crate::server::state::Failover;
use crate::Result;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{interval_at, timeout, MissedTickBehavior};
use tracing::Level;

const INBOUND_CAPACITY: usize = 1024;

pub struct AsyncServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    peers: Arc<PeerRegistry>,
    config: AsyncServerConfig,
}

impl AsyncServer {
    /// Bind the endpoint and open the journal. Either failure is fatal.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        pool: Arc<ResourcePool>,
        metrics: Arc<MetricsCollector>,
        config: AsyncServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let journal = match &config.journal_path {
            Some(path) => Some(EventJournal::open(path)?),
            None => None,
        };

        let peers = Arc::new(PeerRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            pool,
            Arc::new(Failover::new(config.replica_enabled, config.failover_delay())),
            ClientRegistry::new(config.client_timeout()),
            Arc::clone(&peers),
            journal,
            metrics,
        ));

        Ok(Self {
            listener,
            dispatcher,
            peers,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared dispatcher, for status reporting
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Serve until `shutdown` flips, then wait up to the grace period for
    /// in-flight handlers
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = self.local_addr()?;
        let pool_size = self.config.worker_pool_size.max(1);
        let workers = Arc::new(Semaphore::new(pool_size));

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(INBOUND_CAPACITY);
        tokio::spawn(serve_peers(
            self.listener,
            Arc::clone(&self.peers),
            inbound_tx,
            shutdown.clone(),
            "server",
        ));
        tokio::spawn(sweep(
            Arc::clone(&self.dispatcher),
            self.config.clone(),
            shutdown.clone(),
        ));

        log_server!(
            Level::INFO,
            addr = %addr,
            workers = pool_size,
            replica_enabled = self.config.replica_enabled,
            role = self.dispatcher.status().role,
            "Server started"
        );

        loop {
            let inbound = tokio::select! {
                _ = shutdown.changed() => break,
                inbound = inbound_rx.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break,
                },
            };

            let permit = match Arc::clone(&workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let dispatcher = Arc::clone(&self.dispatcher);
            let peers = Arc::clone(&self.peers);

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                serve_one(&dispatcher, &peers, inbound);
            });
        }

        // Every permit back means every handler finished
        let grace = self.config.shutdown_grace();
        match timeout(grace, workers.acquire_many(pool_size as u32)).await {
            Ok(_) => log_server!(Level::INFO, "Server stopped"),
            Err(_) => log_server!(
                Level::WARN,
                grace_ms = grace.as_millis() as u64,
                "Server stopped with handlers still running"
            ),
        }
        Ok(())
    }
}

/// Handle one frame and queue its reply
fn serve_one(dispatcher: &Dispatcher, peers: &PeerRegistry, inbound: Inbound) {
    let peer = inbound.peer;
    let outcome = catch_unwind(AssertUnwindSafe(|| dispatcher.handle(peer, &inbound.payload)));

    match outcome {
        Ok(Ok(reply)) => match reply.encode() {
            Ok(payload) => {
                if !peers.send(peer, payload) {
                    tracing::debug!(peer = %peer, "Client left before reply");
                }
            }
            Err(e) => {
                dispatcher.metrics().record_failed();
                log_server!(Level::ERROR, peer = %peer, error = %e, "Failed to encode reply");
            }
        },
        Ok(Err(e)) => {
            dispatcher.metrics().record_unserved();
            log_server!(Level::WARN, peer = %peer, error = %e, "Dropping payload");
        }
        Err(_) => {
            dispatcher.metrics().record_failed();
            log_server!(Level::ERROR, peer = %peer, "Handler panicked");
        }
    }
}

/// Background liveness sweep and failover monitor
async fn sweep(
    dispatcher: Arc<Dispatcher>,
    config: AsyncServerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let sweep_period = config.sweep_interval();
    let monitor_period = Duration::from_millis(config.heartbeat_interval_ms.max(1));
    let start = tokio::time::Instant::now();

    let mut sweep_tick = interval_at(start + sweep_period, sweep_period);
    sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut monitor_tick = interval_at(start + monitor_period, monitor_period);
    monitor_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sweep_tick.tick() => {
                dispatcher.evict_stale(Instant::now());
            }
            _ = monitor_tick.tick(), if config.replica_enabled => {
                dispatcher.monitor_failover();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pool::Capacity;
    use crate::net::{read_frame, write_frame};
    use tokio::net::TcpStream;

    async fn start(config: AsyncServerConfig) -> (SocketAddr, Arc<Dispatcher>, watch::Sender<bool>) {
        let pool = Arc::new(ResourcePool::new(Capacity::new(10, 4)));
        let server = AsyncServer::bind("127.0.0.1:0", pool, Arc::new(MetricsCollector::new()), config)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let dispatcher = server.dispatcher();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.run(shutdown_rx));
        (addr, dispatcher, shutdown_tx)
    }

    #[tokio::test]
    async fn test_ping_round_trip() {
        let (addr, _dispatcher, _shutdown) = start(AsyncServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        write_frame(&mut stream, "PING_SERVER").await.unwrap();
        assert_eq!(read_frame(&mut stream).await.unwrap().as_deref(), Some("PONG"));
    }

    #[tokio::test]
    async fn test_malformed_payload_gets_no_reply() {
        let (addr, dispatcher, _shutdown) = start(AsyncServerConfig::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        write_frame(&mut stream, "NOT A MESSAGE").await.unwrap();
        write_frame(&mut stream, "HEARTBEAT").await.unwrap();

        // The next frame on the wire is the heartbeat's reply
        assert_eq!(read_frame(&mut stream).await.unwrap().as_deref(), Some("PONG"));

        // Handlers run concurrently; the bad frame may finish after the heartbeat
        for _ in 0..50 {
            if dispatcher.metrics().snapshot().unserved == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dispatcher.metrics().snapshot().unserved, 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_silent_clients() {
        let config = AsyncServerConfig {
            client_timeout_ms: 150,
            sweep_interval_ms: 20,
            ..AsyncServerConfig::default()
        };
        let (addr, dispatcher, _shutdown) = start(config).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        write_frame(&mut stream, "PING_SERVER").await.unwrap();
        read_frame(&mut stream).await.unwrap();
        assert_eq!(dispatcher.status().active_clients, 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let status = dispatcher.status();
        assert_eq!(status.active_clients, 0);
        assert_eq!(status.unique_clients, 1);
        // Eviction does not close the connection
        assert_eq!(status.connected_clients, 1);
    }
}
