//! Accept loop and per-connection task dispatch.
//!
//! # Responsibilities
//! - Accept client connections within the connection limit
//! - Give each connection its own task, context snapshot, and shutdown handle
//! - Swap the shared context when a reloaded config arrives
//! - On shutdown: stop accepting, close every tunnel, wait for drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::http::InterceptorChain;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionId, ConnectionPermit, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::tunnel::context::TunnelContext;
use crate::tunnel::relay::serve_connection;
use crate::tunnel::upstream::{TcpConnector, Upstream};

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// CONNECT tunnel server.
pub struct TunnelServer<U: Upstream = TcpConnector> {
    config: TunnelConfig,
    context: Arc<ArcSwap<TunnelContext>>,
    custom_interceptors: InterceptorChain,
    upstream: Arc<U>,
    tracker: ConnectionTracker,
    tunnels: Shutdown,
    shutdown_grace: Duration,
}

impl TunnelServer<TcpConnector> {
    /// Create a server that dials targets over TCP.
    pub fn new(config: TunnelConfig) -> Self {
        Self::with_upstream(config, TcpConnector)
    }
}

impl<U: Upstream> TunnelServer<U> {
    /// Create a server with a custom upstream dialer.
    pub fn with_upstream(config: TunnelConfig, upstream: U) -> Self {
        Self {
            context: Arc::new(ArcSwap::from_pointee(TunnelContext::from_config(&config))),
            custom_interceptors: InterceptorChain::new(),
            upstream: Arc::new(upstream),
            tracker: ConnectionTracker::new(),
            tunnels: Shutdown::new(),
            shutdown_grace: Duration::from_secs(config.timeouts.shutdown_grace_secs),
            config,
        }
    }

    /// Run `interceptors` after the ones built from the policy config.
    /// They survive config reloads.
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.custom_interceptors = interceptors;
        let context = self.build_context(&self.config);
        self.context.store(Arc::new(context));
        self
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Snapshot of the context new connections would get right now.
    pub fn context(&self) -> Arc<TunnelContext> {
        self.context.load_full()
    }

    /// Handle for observing live connections.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Run the accept loop until `shutdown` fires.
    ///
    /// Validated configs received on `config_updates` replace the context for
    /// connections accepted afterwards; open tunnels keep their snapshot.
    pub async fn run(
        mut self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<TunnelConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "Tunnel server starting");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_connection(stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(config) = config_updates.recv() => self.apply_config(config),
                _ = shutdown.recv() => break,
            }
        }

        drop(listener);
        let open = self.tracker.active_count();
        tracing::info!(open_connections = open, "Stopped accepting, closing tunnels");
        self.tunnels.trigger();

        if !self.tracker.wait_for_drain(self.shutdown_grace).await {
            tracing::warn!(
                open_connections = self.tracker.active_count(),
                "Connections still open after shutdown grace period"
            );
        }

        tracing::info!("Tunnel server stopped");
        Ok(())
    }

    fn apply_config(&mut self, config: TunnelConfig) {
        if config.listener.bind_address != self.config.listener.bind_address {
            tracing::warn!(
                bind_address = %config.listener.bind_address,
                "Listener address changes require a restart"
            );
        }
        let context = self.build_context(&config);
        self.context.store(Arc::new(context));
        self.shutdown_grace = Duration::from_secs(config.timeouts.shutdown_grace_secs);
        self.config = config;
        tracing::info!("Configuration reloaded");
    }

    fn build_context(&self, config: &TunnelConfig) -> TunnelContext {
        let context = TunnelContext::from_config(config);
        if self.custom_interceptors.is_empty() {
            return context;
        }
        let mut chain = context.interceptors.clone();
        chain.extend(&self.custom_interceptors);
        context.with_interceptors(chain)
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let context = self.context.load_full();
        let upstream = Arc::clone(&self.upstream);
        let guard = self.tracker.track();
        let shutdown = self.tunnels.subscribe();

        tokio::spawn(async move {
            let _permit = permit;
            let id = guard.id();
            metrics::connection_opened();

            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(connection_id = %id, error = %e, "Failed to set TCP_NODELAY");
            }

            match serve_connection(stream, id, context, upstream.as_ref(), shutdown).await {
                Ok(summary) => {
                    tracing::info!(
                        connection_id = %id,
                        peer_addr = %peer,
                        target = %summary.target,
                        bytes_up = summary.bytes_up,
                        bytes_down = summary.bytes_down,
                        duration_ms = summary.duration.as_millis() as u64,
                        reason = summary.reason.as_str(),
                        "Tunnel closed"
                    );
                    metrics::record_tunnel(&summary);
                    metrics::connection_closed(summary.reason.as_str());
                }
                Err(e) => {
                    log_failure(id, peer, &e);
                    metrics::connection_closed(e.outcome());
                }
            }
            drop(guard);
        });
    }
}

fn log_failure(id: ConnectionId, peer: SocketAddr, error: &TunnelError) {
    match error {
        TunnelError::UpstreamConnect { .. } | TunnelError::UpstreamTimeout { .. } => {
            tracing::warn!(connection_id = %id, peer_addr = %peer, error = %error, "Upstream connection failed");
        }
        TunnelError::UnsupportedMethod(_) | TunnelError::Rejected { .. } => {
            tracing::info!(connection_id = %id, peer_addr = %peer, error = %error, "Request refused");
        }
        TunnelError::MalformedRequest(_) | TunnelError::HandshakeTimeout(_) => {
            tracing::info!(connection_id = %id, peer_addr = %peer, error = %error, "Connection dropped");
        }
        TunnelError::ClientClosed | TunnelError::Shutdown | TunnelError::Io(_) => {
            tracing::debug!(connection_id = %id, peer_addr = %peer, error = %error, "Connection ended");
        }
    }
}
