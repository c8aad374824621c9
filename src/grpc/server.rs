use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::grpc::agent_service::AgentService;
use crate::grpc::client_service::ClientService;
use crate::proto::calculator_server::CalculatorServer;
use crate::proto::orchestrator_server::OrchestratorServer;
use crate::scheduler::Orchestrator;

pub struct GrpcServer {
    orchestrator: Arc<Orchestrator>,
}

impl GrpcServer {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Serve both the agent-facing and the client-facing service on
    /// `listener` until `shutdown` resolves.
    pub async fn run_with_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()>,
    {
        let agent_service = AgentService::new(self.orchestrator.clone());
        let client_service = ClientService::new(self.orchestrator.clone());

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "Starting gRPC server");
        }

        Server::builder()
            .add_service(OrchestratorServer::new(agent_service))
            .add_service(CalculatorServer::new(client_service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await
    }
}
