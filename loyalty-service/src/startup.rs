//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;

use service_core::error::AppError;
use tokio::net::TcpListener;
use tokio::signal;

use crate::config::LoyaltyConfig;
use crate::services::{
    AccountDirectory, IdGenerator, IdentityService, JwtService, LedgerBackend, LedgerService,
    RandomIdGenerator, SquareLedger,
};
use crate::{build_router, AppState};

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: LoyaltyConfig) -> Result<Self, AppError> {
        let state = build_state(config.clone()).await?;

        // Port 0 binds a random port
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let app = build_router(self.state);

        tracing::info!(port = self.port, "Listening");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Service shutdown complete");
        Ok(())
    }
}

/// Wire the directory, identity and ledger services. The ledger runs against
/// Square when credentials are configured and the loyalty program resolves,
/// otherwise on the in-process log for the lifetime of the process.
pub async fn build_state(config: LoyaltyConfig) -> Result<AppState, AppError> {
    let directory = Arc::new(AccountDirectory::new());
    let ids: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator);

    let jwt = JwtService::new(&config.jwt);
    let identity = IdentityService::new(directory.clone(), jwt, ids.clone());

    let backend = select_backend(&config).await?;
    let ledger = LedgerService::new(directory, backend, ids)
        .with_remote_timeout(config.square.timeout());

    Ok(AppState {
        config,
        identity,
        ledger: Arc::new(ledger),
    })
}

async fn select_backend(config: &LoyaltyConfig) -> Result<LedgerBackend, AppError> {
    if !config.square.is_configured() {
        return Ok(LedgerBackend::fallback());
    }

    let client = reqwest::Client::builder()
        .timeout(config.square.timeout())
        .build()
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

    match SquareLedger::connect(client, config.square.clone()).await {
        Ok(square) => {
            tracing::info!(
                environment = ?config.square.environment,
                program_id = %square.program_id(),
                "Square loyalty ledger connected"
            );
            Ok(LedgerBackend::remote(Arc::new(square)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Square loyalty ledger unavailable, using in-process ledger");
            Ok(LedgerBackend::fallback())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
