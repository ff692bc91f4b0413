//! Broker server: wires configuration, transport and handlers together.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info};

use super::router::{AppState, create_router};
use crate::config::BrokerConfig;
use crate::minter::{IamCredentialsMinter, TokenMinter, TokenRequest};
use crate::mtls::{PeerConnection, TlsListener, build_acceptor};
use crate::peer::{HostResolver, PeerVerifier, SystemResolver};
use crate::{Error, Result};

/// The token broker
pub struct Broker {
    config: BrokerConfig,
    acceptor: TlsAcceptor,
    state: Arc<AppState>,
}

impl Broker {
    /// Create a broker using the system resolver and the IAM Credentials API.
    ///
    /// # Errors
    ///
    /// Fails if the TLS material cannot be loaded or the HTTP client cannot
    /// be built.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let minter = IamCredentialsMinter::from_config(&config.upstream)?;
        Self::with_collaborators(config, Arc::new(SystemResolver), Arc::new(minter))
    }

    /// Create a broker with explicit resolver and minter.
    ///
    /// # Errors
    ///
    /// Fails if the TLS material cannot be loaded.
    pub fn with_collaborators(
        config: BrokerConfig,
        resolver: Arc<dyn HostResolver>,
        minter: Arc<dyn TokenMinter>,
    ) -> Result<Self> {
        let acceptor = build_acceptor(&config.mtls)?;
        let state = Arc::new(AppState {
            verifier: PeerVerifier::new(resolver),
            minter,
            token_request: TokenRequest::from_config(&config.token),
        });

        Ok(Self {
            config,
            acceptor,
            state,
        })
    }

    /// Bind the configured address and serve until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Cannot bind {addr}: {e}")))?;
        self.serve(tcp, shutdown_signal()).await
    }

    /// Serve on an already-bound listener until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Fails only if the server loop itself fails; per-connection errors are
    /// logged and skipped.
    pub async fn serve<F>(self, tcp: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = tcp.local_addr()?;
        info!(
            addr = %local_addr,
            service_account = %self.state.token_request.service_account,
            scopes = ?self.state.token_request.scopes,
            lifetime_secs = self.state.token_request.lifetime.as_secs(),
            "Token broker listening"
        );

        let listener = TlsListener::new(tcp, self.acceptor, self.config.handshake_timeout());
        let app = create_router(self.state);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<PeerConnection>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Token broker stopped");
        Ok(())
    }
}

/// Completes on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
