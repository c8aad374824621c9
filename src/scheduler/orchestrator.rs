use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::error::{CalcError, Result};
use crate::expression::{parse, Expression, ExpressionStatus, Token};
use crate::scheduler::registry::{AgentRegistry, AgentState};
use crate::scheduler::store::ExpressionStore;

/// Expression store and agent registry, always locked together so that a
/// claim, a result or a reclaim touches both in one step.
#[derive(Debug)]
pub struct SchedulerState {
    pub store: ExpressionStore,
    pub registry: AgentRegistry,
}

/// Work handed to an agent by [`Orchestrator::get_expression_to_evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedExpression {
    pub id: String,
    pub postfix: Vec<Token>,
}

/// Central scheduler. Every operation takes the state lock once, so two
/// agents polling at the same time can never be handed the same expression.
#[derive(Debug)]
pub struct Orchestrator {
    state: RwLock<SchedulerState>,
}

impl Orchestrator {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            state: RwLock::new(SchedulerState {
                store: ExpressionStore::with_capacity(config.max_expressions),
                registry: AgentRegistry::new(config.agent_timeout_ms),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Expression store surface
    // -------------------------------------------------------------------------

    pub async fn submit_expression(&self, infix: &str, owner_id: Option<u64>) -> Result<String> {
        let id = self.state.write().await.store.submit(infix, owner_id)?;
        tracing::info!(expression_id = %id, owner_id = ?owner_id, "Expression submitted");
        Ok(id)
    }

    pub async fn get_expression(&self, id: &str) -> Result<Expression> {
        self.state
            .read()
            .await
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| CalcError::ExpressionNotFound(id.to_string()))
    }

    /// Expressions of one owner, or every expression when `owner_id` is None.
    pub async fn list_expressions(&self, owner_id: Option<u64>) -> Vec<Expression> {
        let state = self.state.read().await;
        let expressions = match owner_id {
            Some(owner_id) => state.store.list_for_owner(owner_id),
            None => state.store.all(),
        };
        expressions.into_iter().cloned().collect()
    }

    pub async fn get_result(&self, id: &str) -> Result<f64> {
        self.state.read().await.store.result(id)
    }

    pub async fn list_agents(&self) -> Vec<AgentState> {
        self.state
            .read()
            .await
            .registry
            .all()
            .into_iter()
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Agent protocol
    // -------------------------------------------------------------------------

    pub async fn register_new_agent(&self) -> u64 {
        self.state.write().await.registry.register()
    }

    /// Deregister an agent and put every expression it had claimed back in
    /// the queue. Returns the ids of the reverted expressions.
    pub async fn remove_agent(&self, agent_id: u64) -> Vec<String> {
        let mut state = self.state.write().await;
        let reverted = Self::release_agent(&mut state, agent_id);
        tracing::info!(agent_id, reverted = reverted.len(), "Agent removed");
        reverted
    }

    /// Refresh an agent's liveness, or deregister it on an explicit
    /// negative signal.
    pub async fn heartbeat(&self, agent_id: u64, is_alive: bool) -> Result<()> {
        if !is_alive {
            self.remove_agent(agent_id).await;
            return Ok(());
        }
        if self.state.write().await.registry.heartbeat(agent_id) {
            tracing::trace!(agent_id, "Heartbeat");
            Ok(())
        } else {
            Err(CalcError::AgentNotFound(agent_id))
        }
    }

    /// Claim the oldest `new` expression for `agent_id`.
    ///
    /// An agent holds at most one claim: anything it still has when it polls
    /// again was never reported, so it goes back to the queue first and is
    /// left for other agents on this poll.
    ///
    /// The stored infix text is parsed again before it is handed out; if that
    /// fails the expression is marked invalid and the parse error returned.
    pub async fn get_expression_to_evaluate(&self, agent_id: u64) -> Result<ClaimedExpression> {
        let mut state = self.state.write().await;
        if !state.registry.heartbeat(agent_id) {
            return Err(CalcError::AgentNotFound(agent_id));
        }

        let unreported = Self::revert_claims(&mut state, agent_id);
        if !unreported.is_empty() {
            tracing::warn!(agent_id, reverted = ?unreported, "Agent polled again without reporting, claims reverted");
        }

        let (id, infix) = match state.store.next_pending_excluding(&unreported) {
            Some(expression) => (expression.id.clone(), expression.infix.clone()),
            None => return Err(CalcError::NoWorkAvailable),
        };

        match parse(&infix) {
            Ok(postfix) => {
                state.store.mark_solving(&id, agent_id);
                state.registry.mark_solving(agent_id, &id);
                tracing::info!(expression_id = %id, agent_id, "Expression claimed");
                Ok(ClaimedExpression { id, postfix })
            }
            Err(e) => {
                state.store.mark_invalid(&id);
                tracing::warn!(expression_id = %id, error = %e, "Stored expression failed to parse");
                Err(e)
            }
        }
    }

    /// Record an agent's result and free the agent.
    ///
    /// Results are accepted even if the claim was reclaimed in the meantime:
    /// evaluation is deterministic, so a late answer is still the answer.
    pub async fn save_result_of_expression(
        &self,
        expression_id: &str,
        result: f64,
        agent_id: u64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.store.mark_solved(expression_id, result)?;
        state.registry.heartbeat(agent_id);
        state.registry.mark_free(agent_id);
        tracing::info!(expression_id, agent_id, result, "Expression solved");
        Ok(())
    }

    /// Give a claimed expression back. With `invalid` set the expression is
    /// closed as invalid, otherwise it returns to the queue.
    pub async fn abandon_expression(
        &self,
        expression_id: &str,
        agent_id: u64,
        reason: &str,
        invalid: bool,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let status = state
            .store
            .get(expression_id)
            .map(|e| e.status)
            .ok_or_else(|| CalcError::ExpressionNotFound(expression_id.to_string()))?;
        state.registry.mark_free(agent_id);

        if status != ExpressionStatus::Solving(agent_id) {
            tracing::debug!(expression_id, agent_id, status = %status, "Ignoring abandon of unowned expression");
            return Ok(());
        }

        if invalid {
            state.store.mark_invalid(expression_id);
            tracing::warn!(expression_id, agent_id, reason, "Expression marked invalid by agent");
        } else {
            state.store.mark_new(expression_id);
            tracing::warn!(expression_id, agent_id, reason, "Expression abandoned, back in queue");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Failure detection
    // -------------------------------------------------------------------------

    /// Remove every agent that missed its liveness window and revert its
    /// claims, exactly as [`Orchestrator::remove_agent`] does.
    pub async fn reap_stale_agents(&self) -> Vec<u64> {
        let mut state = self.state.write().await;
        let stale = state.registry.stale_agents();
        for &agent_id in &stale {
            let reverted = Self::release_agent(&mut state, agent_id);
            let lost = CalcError::AgentLost(agent_id);
            tracing::warn!(error = %lost, reverted = ?reverted, "Stale agent reaped, claims reverted");
        }
        stale
    }

    /// Periodically reap stale agents until `shutdown` fires.
    pub async fn run_reaper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Reaper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.reap_stale_agents().await;
                }
            }
        }
    }

    fn release_agent(state: &mut SchedulerState, agent_id: u64) -> Vec<String> {
        state.registry.remove(agent_id);
        Self::revert_claims(state, agent_id)
    }

    /// Put every expression claimed by `agent_id` back to `new` and free the
    /// agent. The agent stays registered.
    fn revert_claims(state: &mut SchedulerState, agent_id: u64) -> Vec<String> {
        let claimed = state.store.claimed_by(agent_id);
        for id in &claimed {
            state.store.mark_new(id);
        }
        state.registry.mark_free(agent_id);
        claimed
    }
}
