use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::grpc::GrpcServer;
use crate::scheduler::Orchestrator;

/// Orchestrator process: the gRPC server plus the stale-agent reaper.
pub struct OrchestratorNode {
    pub config: OrchestratorConfig,
    pub orchestrator: Arc<Orchestrator>,
}

impl OrchestratorNode {
    pub fn new(config: OrchestratorConfig) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(&config));
        Self {
            config,
            orchestrator,
        }
    }

    /// Bind `listen_addr` and serve until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the gRPC server
    /// fails. The reaper runs as a spawned task and only logs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let reaper = tokio::spawn(self.orchestrator.clone().run_reaper(
            Duration::from_millis(self.config.reap_interval_ms),
            shutdown.clone(),
        ));

        tracing::info!(
            agent_timeout_ms = self.config.agent_timeout_ms,
            reap_interval_ms = self.config.reap_interval_ms,
            max_expressions = self.config.max_expressions,
            "Orchestrator started"
        );

        let server = GrpcServer::new(self.orchestrator.clone());
        let served = server
            .run_with_listener(listener, shutdown.clone().cancelled_owned())
            .await;

        shutdown.cancel();
        let _ = reaper.await;
        tracing::info!("Orchestrator stopped");
        served.map_err(Into::into)
    }
}
