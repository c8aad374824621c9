use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::error::CalcError;
use crate::proto::orchestrator_server::Orchestrator as OrchestratorRpc;
use crate::proto::{
    tokens_to_proto, AbandonRequest, AgentId, Empty, ExpressionTask, HeartbeatRequest,
    ResultOfExpression,
};
use crate::scheduler::Orchestrator;

/// gRPC service agents talk to: registration, polling, results, liveness.
pub struct AgentService {
    orchestrator: Arc<Orchestrator>,
}

impl AgentService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

fn require_agent_id(agent_id: u64) -> Result<u64, Status> {
    if agent_id == 0 {
        return Err(Status::invalid_argument("agent_id is required"));
    }
    Ok(agent_id)
}

#[tonic::async_trait]
impl OrchestratorRpc for AgentService {
    async fn register_new_agent(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<AgentId>, Status> {
        let agent_id = self.orchestrator.register_new_agent().await;
        Ok(Response::new(AgentId { agent_id }))
    }

    async fn remove_agent(&self, request: Request<AgentId>) -> Result<Response<Empty>, Status> {
        let agent_id = require_agent_id(request.into_inner().agent_id)?;
        self.orchestrator.remove_agent(agent_id).await;
        Ok(Response::new(Empty {}))
    }

    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        let agent_id = require_agent_id(req.agent_id)?;
        self.orchestrator.heartbeat(agent_id, req.is_alive).await?;
        Ok(Response::new(Empty {}))
    }

    async fn get_expression_to_evaluate(
        &self,
        request: Request<AgentId>,
    ) -> Result<Response<ExpressionTask>, Status> {
        let agent_id = require_agent_id(request.into_inner().agent_id)?;

        match self.orchestrator.get_expression_to_evaluate(agent_id).await {
            Ok(claimed) => Ok(Response::new(ExpressionTask {
                found: true,
                expression_id: claimed.id,
                postfix: tokens_to_proto(&claimed.postfix),
            })),
            Err(CalcError::NoWorkAvailable) => Ok(Response::new(ExpressionTask {
                found: false,
                expression_id: String::new(),
                postfix: Vec::new(),
            })),
            Err(e) => Err(e.into()),
        }
    }

    async fn give_result_of_expression(
        &self,
        request: Request<ResultOfExpression>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        if req.expression_id.is_empty() {
            return Err(Status::invalid_argument("expression_id is required"));
        }
        let agent_id = require_agent_id(req.agent_id)?;

        self.orchestrator
            .save_result_of_expression(&req.expression_id, req.result, agent_id)
            .await?;
        Ok(Response::new(Empty {}))
    }

    async fn abandon_expression(
        &self,
        request: Request<AbandonRequest>,
    ) -> Result<Response<Empty>, Status> {
        let req = request.into_inner();
        if req.expression_id.is_empty() {
            return Err(Status::invalid_argument("expression_id is required"));
        }
        let agent_id = require_agent_id(req.agent_id)?;

        self.orchestrator
            .abandon_expression(&req.expression_id, agent_id, &req.reason, req.invalid)
            .await?;
        Ok(Response::new(Empty {}))
    }
}
