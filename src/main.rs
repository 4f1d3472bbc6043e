//! Classroom and lab allocation server
//!
//! # Architecture
//! - **core**: Resource pool and shared data model
//! - **broker**: Load-balancing broker with a worker pool
//! - **server**: Asynchronous server with liveness and failover
//! - **infrastructure**: Cold path (logging, metrics, config, api)
//!
//! `[server] mode` picks the transport.

use facility_alloc::broker::LoadBalancingBroker;
use facility_alloc::core::ResourcePool;
use facility_alloc::infrastructure::config::{Config, ServerMode};
use facility_alloc::infrastructure::logging::init_logging;
use facility_alloc::infrastructure::metrics::MetricsCollector;
use facility_alloc::infrastructure::start_server;
use facility_alloc::log_main;
use facility_alloc::server::AsyncServer;
use facility_alloc::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Level;

/// Main application state
pub struct AllocatorApp {
    config: Config,
}

impl AllocatorApp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Serve until Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let pool = Arc::new(ResourcePool::new(self.config.resources.capacity()));
        let metrics = Arc::new(MetricsCollector::new());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log_main!(Level::INFO, "Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
        });

        let bind_addr = self.config.server.bind_addr();
        log_main!(
            Level::INFO,
            mode = ?self.config.server.mode,
            addr = %bind_addr,
            capacity = ?pool.capacity(),
            "Starting allocator"
        );

        match self.config.server.mode {
            ServerMode::Broker => {
                let broker = LoadBalancingBroker::bind(
                    &bind_addr,
                    Arc::clone(&pool),
                    Arc::clone(&metrics),
                    self.config.broker.clone(),
                )
                .await?;
                broker.run(shutdown_rx).await?;
            }
            ServerMode::Async => {
                let server = AsyncServer::bind(
                    &bind_addr,
                    Arc::clone(&pool),
                    Arc::clone(&metrics),
                    self.config.async_server.clone(),
                )
                .await?;

                if self.config.api.enabled {
                    let dispatcher = server.dispatcher();
                    let metrics_for_api = Arc::clone(&metrics);
                    let port = self.config.api.port;
                    tokio::spawn(async move {
                        if let Err(e) = start_server(dispatcher, metrics_for_api, port).await {
                            tracing::error!("API Server failed: {}", e);
                        }
                    });
                }

                server.run(shutdown_rx).await?;
            }
        }

        log_main!(Level::INFO, stats = %pool.statistics(), "Final pool state");
        log_main!(Level::INFO, summary = %metrics.snapshot(), "Allocator stopped");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Guards flush the file writers on drop
    let _log_guards = init_logging("logs")?;

    let config = Config::load()?;
    config.validate()?;

    let app = AllocatorApp::new(config);
    app.run().await?;

    Ok(())
}
