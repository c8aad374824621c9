use tonic::transport::{Channel, Endpoint};

use crate::config::RetryConfig;
use crate::error::{CalcError, Result};
use crate::grpc::retry::RetryPolicy;
use crate::proto::orchestrator_client::OrchestratorClient;
use crate::proto::{
    tokens_from_proto, AbandonRequest, AgentId, Empty, HeartbeatRequest, ResultOfExpression,
};
use crate::scheduler::ClaimedExpression;

/// Agent-side handle on the orchestrator. Every call goes through the
/// [`RetryPolicy`].
#[derive(Clone)]
pub struct AgentClient {
    client: OrchestratorClient<Channel>,
    retry: RetryPolicy,
}

impl AgentClient {
    /// Build a client without connecting; the channel connects on first use
    /// so an agent can start before its orchestrator.
    pub fn connect_lazy(addr: &str, retry: &RetryConfig) -> Result<Self> {
        let retry = RetryPolicy::new(retry);
        let channel = Endpoint::from_shared(addr.to_string())?
            .connect_timeout(retry.per_attempt_timeout())
            .connect_lazy();
        Ok(Self {
            client: OrchestratorClient::new(channel),
            retry,
        })
    }

    pub async fn register_new_agent(&self) -> Result<u64> {
        let response = self
            .retry
            .call("register_new_agent", || {
                let mut client = self.client.clone();
                async move { client.register_new_agent(Empty {}).await }
            })
            .await?;
        Ok(response.agent_id)
    }

    pub async fn remove_agent(&self, agent_id: u64) -> Result<()> {
        self.retry
            .call("remove_agent", || {
                let mut client = self.client.clone();
                async move { client.remove_agent(AgentId { agent_id }).await }
            })
            .await?;
        Ok(())
    }

    pub async fn heartbeat(&self, agent_id: u64, is_alive: bool) -> Result<()> {
        self.retry
            .call("heartbeat", || {
                let mut client = self.client.clone();
                async move {
                    client
                        .heartbeat(HeartbeatRequest { agent_id, is_alive })
                        .await
                }
            })
            .await?;
        Ok(())
    }

    /// Poll for work. An empty poll is reported as `NoWorkAvailable`.
    pub async fn get_expression_to_evaluate(&self, agent_id: u64) -> Result<ClaimedExpression> {
        let task = self
            .retry
            .call("get_expression_to_evaluate", || {
                let mut client = self.client.clone();
                async move { client.get_expression_to_evaluate(AgentId { agent_id }).await }
            })
            .await?;

        if !task.found {
            return Err(CalcError::NoWorkAvailable);
        }
        Ok(ClaimedExpression {
            id: task.expression_id,
            postfix: tokens_from_proto(task.postfix)?,
        })
    }

    pub async fn give_result_of_expression(
        &self,
        expression_id: &str,
        result: f64,
        agent_id: u64,
    ) -> Result<()> {
        self.retry
            .call("give_result_of_expression", || {
                let mut client = self.client.clone();
                let request = ResultOfExpression {
                    expression_id: expression_id.to_string(),
                    result,
                    agent_id,
                };
                async move { client.give_result_of_expression(request).await }
            })
            .await?;
        Ok(())
    }

    pub async fn abandon_expression(
        &self,
        expression_id: &str,
        agent_id: u64,
        reason: &str,
        invalid: bool,
    ) -> Result<()> {
        self.retry
            .call("abandon_expression", || {
                let mut client = self.client.clone();
                let request = AbandonRequest {
                    expression_id: expression_id.to_string(),
                    agent_id,
                    reason: reason.to_string(),
                    invalid,
                };
                async move { client.abandon_expression(request).await }
            })
            .await?;
        Ok(())
    }
}
