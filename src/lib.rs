//! WebRTC signaling relay.
//!
//! Rendezvouses browser peers into short-lived rooms and forwards SDP
//! offers/answers, ICE candidates, and small control messages between them.
//! Media and bulk data never traverse this service — it is a control-plane
//! broker for peer discovery and session negotiation, not a TURN/media
//! relay. [`SignalingRelay`] bundles the registries, the HTTP/WebSocket
//! router, and the liveness supervisor so it can be embedded or run as a
//! standalone binary.
//!
//! # Example
//!
//! ```rust,no_run
//! use signal_relay::{config::Config, SignalingRelay};
//!
//! #[tokio::main]
//! async fn main() {
//!     let relay = SignalingRelay::new(Config::default());
//!     relay.run().await.unwrap();
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod id;
pub mod peer;
pub mod protocol;
pub mod room;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info};

use config::Config;
use state::AppState;

/// Hard ceiling on graceful shutdown (§4.9): if listeners or in-flight
/// handler work haven't wound down by then, the process exits anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// A signaling relay bound to one process-wide [`AppState`].
///
/// Owns the peer/room registries, the combined HTTP + WebSocket router, and
/// the two liveness-supervisor tasks. `run` binds the listener, starts the
/// supervisor, and serves until a shutdown signal (Ctrl-C or SIGTERM)
/// arrives, at which point it broadcasts `server-shutdown` to every open
/// peer before the listener unbinds.
pub struct SignalingRelay {
    state: Arc<AppState>,
}

impl SignalingRelay {
    /// Build a relay from `config`, clamping any nonsensical values first.
    pub fn new(mut config: Config) -> Self {
        config.validate();
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    /// A reference to the shared state, for embedding callers that want to
    /// inspect peer/room counts without going through the HTTP surface.
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Bind the listener, start the heartbeat/cleanup sweeps, and serve
    /// until shutdown. Returns only on a fatal bind error or after a
    /// graceful stop completes.
    pub async fn run(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.state.config.host, self.state.config.port)
            .parse()?;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let heartbeat = tokio::spawn(supervisor::heartbeat_task(
            self.state.clone(),
            shutdown_tx.subscribe(),
        ));
        let stale = tokio::spawn(supervisor::stale_task(
            self.state.clone(),
            shutdown_tx.subscribe(),
        ));

        let router = transport::build_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "Server started");

        let shutdown_state = self.state.clone();
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received, notifying peers");
            transport::shutdown_all_peers(&shutdown_state).await;
            let _ = shutdown_tx.send(());
        });

        let hard_exit = tokio::spawn(async move {
            tokio::time::sleep(SHUTDOWN_GRACE).await;
            error!("graceful shutdown exceeded {:?}, forcing exit", SHUTDOWN_GRACE);
            std::process::exit(1);
        });

        if let Err(e) = serve.await {
            error!(error = %e, "server loop exited with error");
        }
        hard_exit.abort();

        let _ = heartbeat.await;
        let _ = stale.await;
        info!("Server stopped");
        Ok(())
    }
}

/// Resolve when either Ctrl-C or, on Unix, SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            std::future::pending::<()>().await;
            return;
        };
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
