//! Composition root: builds every component once and wires them together.

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::network::Multiplexer;
use crate::notify::{Broadcaster, MulticastBroadcaster, SubscriberHub};
use crate::ranking::{RankingEngine, ScoringPolicy};
use crate::registry::Registries;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task;

pub struct App {
    config: ServerConfig,
    registries: Arc<Registries>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    ranking_interval: Duration,
}

impl App {
    /// Loads the data files named by `config`.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let registries = Arc::new(Registries::open(&config.data_dir)?);
        let ranking_interval = config.ranking_interval();
        Ok(Self {
            config,
            registries,
            broadcaster: None,
            ranking_interval,
        })
    }

    /// Replaces the multicast announcer.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Overrides the configured ranking period.
    pub fn with_ranking_interval(mut self, period: Duration) -> Self {
        self.ranking_interval = period;
        self
    }

    pub fn registries(&self) -> Arc<Registries> {
        Arc::clone(&self.registries)
    }

    /// Binds the listening socket and starts the multiplexer thread and the
    /// ranking loop. Must be called from within a multi-thread runtime,
    /// whose blocking pool becomes the worker pool.
    pub async fn start(self) -> Result<RunningApp, ServerError> {
        let config = self.config;

        let listener = std::net::TcpListener::bind(config.listen_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let broadcaster: Arc<dyn Broadcaster> = match self.broadcaster {
            Some(broadcaster) => broadcaster,
            None => Arc::new(MulticastBroadcaster::new(
                config.multicast_group,
                config.multicast_port,
                config.multicast_ttl,
            )?),
        };

        let subscribers = Arc::new(SubscriberHub::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.registries),
            Arc::clone(&subscribers),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let multiplexer = Multiplexer::new(
            listener,
            dispatcher,
            Handle::current(),
            config.max_payload,
            shutdown_rx,
        )
        .spawn()?;

        let engine = RankingEngine::new(
            Arc::clone(&self.registries),
            broadcaster,
            subscribers,
            ScoringPolicy {
                low_rate_penalty: config.low_rate_penalty,
            },
        );
        let ranking = tokio::spawn(engine.run(self.ranking_interval));

        info!(
            "Server started on {} (ranking every {:?})",
            local_addr, self.ranking_interval
        );

        Ok(RunningApp {
            local_addr,
            registries: self.registries,
            shutdown: shutdown_tx,
            multiplexer: Some(multiplexer),
            ranking: Some(ranking),
        })
    }
}

/// Handle to a started server.
pub struct RunningApp {
    local_addr: SocketAddr,
    registries: Arc<Registries>,
    shutdown: watch::Sender<bool>,
    multiplexer: Option<JoinHandle<()>>,
    ranking: Option<task::JoinHandle<()>>,
}

impl RunningApp {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registries(&self) -> Arc<Registries> {
        Arc::clone(&self.registries)
    }

    /// Resolves if the ranking loop ever stops on its own.
    pub async fn ranking_stopped(&mut self) {
        match self.ranking.take() {
            Some(ranking) => {
                if let Err(e) = ranking.await {
                    error!("Ranking task failed: {}", e);
                }
            }
            None => std::future::pending().await,
        }
    }

    /// Stops accepting connections and the ranking loop, then saves all data.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(ranking) = self.ranking.take() {
            ranking.abort();
        }

        if let Some(multiplexer) = self.multiplexer.take() {
            let joined = task::spawn_blocking(move || multiplexer.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                error!("Multiplexer thread did not stop cleanly");
            }
        }

        let registries = Arc::clone(&self.registries);
        match task::spawn_blocking(move || registries.save_all()).await {
            Ok(Ok(())) => info!("Data saved, server stopped"),
            Ok(Err(e)) => error!("Failed to save data on shutdown: {}", e),
            Err(e) => error!("Final save aborted: {}", e),
        }
    }
}
