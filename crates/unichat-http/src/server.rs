//! Server assembly: registry, liveness probe and router on one listener.

use axum::Router;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;
use unichat_realtime::{CategoryName, ConnectionRegistry, LivenessProbe};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::identity::IdentityResolver;
use crate::metrics::RealtimeMetrics;
use crate::routes::{AppState, router};
use crate::shutdown::{shutdown_signal, shutdown_with_cleanup};

pub struct RealtimeServer {
    config: ServerConfig,
    state: AppState,
    probe: Arc<LivenessProbe>,
}

impl RealtimeServer {
    pub fn new(
        config: ServerConfig,
        identity: Arc<dyn IdentityResolver>,
    ) -> Result<Self, ServerError> {
        let registry = Arc::new(ConnectionRegistry::new(config.realtime.clone()));
        let probe = Arc::new(LivenessProbe::new(Arc::clone(&registry)));
        let categories: HashSet<CategoryName> = config
            .categories
            .iter()
            .map(|name| CategoryName::from(name.as_str()))
            .collect();
        let metrics = RealtimeMetrics::new("unichat")?;

        Ok(Self {
            state: AppState {
                registry,
                identity,
                categories: Arc::new(categories),
                metrics,
            },
            config,
            probe,
        })
    }

    /// Registry shared with domain services that publish events.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub fn router(&self) -> Router {
        router(self.state.clone(), self.config.enable_cors)
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// On shutdown the liveness probe stops and every registered connection
    /// is closed before the server drains.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_probe, probe_stopped) = oneshot::channel::<()>();
        let sweeper = tokio::spawn(Arc::clone(&self.probe).run(
            self.config.realtime.sweep_interval,
            async move {
                let _ = probe_stopped.await;
            },
        ));

        let registry = self.registry();
        let app = self.router();
        let graceful = shutdown_with_cleanup(shutdown, move || async move {
            let _ = stop_probe.send(());
            registry.shutdown().await;
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .await
            .map_err(ServerError::Serve)?;

        let _ = sweeper.await;
        info!("Realtime server stopped");
        Ok(())
    }
}

/// Bind `config.bind_addr` and serve until SIGINT or SIGTERM.
pub async fn serve(
    config: ServerConfig,
    identity: Arc<dyn IdentityResolver>,
) -> Result<(), ServerError> {
    let addr = config.bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    info!(
        %addr,
        categories = ?config.categories,
        cors = config.enable_cors,
        "UniChat realtime server listening"
    );
    RealtimeServer::new(config, identity)?
        .run(listener, shutdown_signal())
        .await
}
