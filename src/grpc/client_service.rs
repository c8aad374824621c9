use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::expression::{Expression, ExpressionStatus};
use crate::proto::calculator_server::Calculator;
use crate::proto::{
    tokens_to_proto, AgentInfo, Empty, ExpressionId, ExpressionInfo, ListAgentsResponse,
    ListExpressionsRequest, ListExpressionsResponse, ResultResponse, SubmitExpressionRequest,
    SubmitExpressionResponse,
};
use crate::scheduler::{AgentState, Orchestrator};

/// gRPC service for clients: submit expressions and read them back.
///
/// Callers are expected to be authenticated upstream; `owner_id` is taken
/// as given.
pub struct ClientService {
    orchestrator: Arc<Orchestrator>,
}

impl ClientService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[tonic::async_trait]
impl Calculator for ClientService {
    async fn submit_expression(
        &self,
        request: Request<SubmitExpressionRequest>,
    ) -> Result<Response<SubmitExpressionResponse>, Status> {
        let req = request.into_inner();

        if req.infix.trim().is_empty() {
            return Err(Status::invalid_argument("Expression cannot be empty"));
        }

        let expression_id = self
            .orchestrator
            .submit_expression(&req.infix, req.owner_id)
            .await?;
        Ok(Response::new(SubmitExpressionResponse { expression_id }))
    }

    async fn get_expression(
        &self,
        request: Request<ExpressionId>,
    ) -> Result<Response<ExpressionInfo>, Status> {
        let req = request.into_inner();
        let expression = self.orchestrator.get_expression(&req.expression_id).await?;
        Ok(Response::new(expression_to_proto(&expression)))
    }

    async fn list_expressions(
        &self,
        request: Request<ListExpressionsRequest>,
    ) -> Result<Response<ListExpressionsResponse>, Status> {
        let req = request.into_inner();
        let expressions = self
            .orchestrator
            .list_expressions(req.owner_id)
            .await
            .iter()
            .map(expression_to_proto)
            .collect();
        Ok(Response::new(ListExpressionsResponse { expressions }))
    }

    async fn get_result(
        &self,
        request: Request<ExpressionId>,
    ) -> Result<Response<ResultResponse>, Status> {
        let req = request.into_inner();
        let expression = self.orchestrator.get_expression(&req.expression_id).await?;

        let (ready, result) = match (expression.status, expression.result) {
            (ExpressionStatus::Solved, Some(result)) => (true, result),
            _ => (false, 0.0),
        };
        Ok(Response::new(ResultResponse {
            expression_id: expression.id,
            ready,
            result,
            status: expression.status.to_string(),
        }))
    }

    async fn list_agents(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ListAgentsResponse>, Status> {
        let agents = self
            .orchestrator
            .list_agents()
            .await
            .iter()
            .map(agent_to_proto)
            .collect();
        Ok(Response::new(ListAgentsResponse { agents }))
    }
}

fn expression_to_proto(expression: &Expression) -> ExpressionInfo {
    ExpressionInfo {
        expression_id: expression.id.clone(),
        infix: expression.infix.clone(),
        postfix: tokens_to_proto(&expression.postfix),
        status: expression.status.to_string(),
        result: expression.result,
        owner_id: expression.owner_id,
        created_at_ms: expression.created_at.timestamp_millis(),
        solved_at_ms: expression.solved_at.map(|dt| dt.timestamp_millis()),
    }
}

fn agent_to_proto(agent: &AgentState) -> AgentInfo {
    AgentInfo {
        agent_id: agent.id,
        status: agent.status_label(),
        last_heartbeat_ms: agent.last_heartbeat_at.timestamp_millis(),
    }
}
