use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tonic::Code;

use crate::config::AgentConfig;
use crate::error::{CalcError, Result};
use crate::grpc::AgentClient;
use crate::worker::{CalculationPool, HeartbeatSender, Reducer};

/// Agent runtime: registers with the orchestrator, polls it for
/// expressions, reduces them on the local calculation pool and reports
/// back. Deregisters when shut down.
pub struct AgentNode {
    config: AgentConfig,
    client: AgentClient,
    pool: Arc<CalculationPool>,
    reducer: Reducer,
    /// 0 while unregistered.
    agent_id: Arc<AtomicU64>,
    /// Outcome that could not be delivered; sent again before the next poll.
    unreported: Mutex<Option<Report>>,
}

/// An outcome owed to the orchestrator.
#[derive(Debug, Clone)]
enum Report {
    Solved {
        agent_id: u64,
        expression_id: String,
        result: f64,
    },
    Abandoned {
        agent_id: u64,
        expression_id: String,
        reason: String,
        invalid: bool,
    },
}

impl Report {
    fn expression_id(&self) -> &str {
        match self {
            Report::Solved { expression_id, .. } | Report::Abandoned { expression_id, .. } => {
                expression_id
            }
        }
    }
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Idle,
    Solved { expression_id: String, result: f64 },
    Abandoned { expression_id: String, invalid: bool },
}

impl AgentNode {
    /// Build the runtime and start its calculation units. Must be called
    /// from inside a tokio runtime.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = AgentClient::connect_lazy(&config.orchestrator_addr, &config.retry)?;
        let pool = Arc::new(CalculationPool::new(config.calculation_units));
        let reducer = Reducer::new(
            pool.clone(),
            config.durations,
            Duration::from_millis(config.subtask_timeout_ms),
        );

        Ok(Self {
            config,
            client,
            pool,
            reducer,
            agent_id: Arc::new(AtomicU64::new(0)),
            unreported: Mutex::new(None),
        })
    }

    pub fn agent_id(&self) -> Option<u64> {
        match self.agent_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn pool(&self) -> &Arc<CalculationPool> {
        &self.pool
    }

    /// Register with the orchestrator unless already registered.
    pub async fn ensure_registered(&self) -> Result<u64> {
        if let Some(id) = self.agent_id() {
            return Ok(id);
        }
        let id = self.client.register_new_agent().await?;
        self.agent_id.store(id, Ordering::SeqCst);
        tracing::info!(agent_id = id, units = self.pool.size(), "Agent registered");
        Ok(id)
    }

    /// Whether an outcome is still waiting to be delivered.
    pub async fn has_unreported(&self) -> bool {
        self.unreported.lock().await.is_some()
    }

    /// Claim at most one expression, reduce it and report the outcome.
    ///
    /// A reduction that fails with a recoverable error gives the expression
    /// back to the queue; any other failure closes it as invalid. An outcome
    /// that cannot be delivered is kept and sent once more before the next
    /// claim; if that fails too it is dropped and the orchestrator requeues
    /// the expression when this agent polls.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        self.flush_unreported().await;
        let agent_id = self.ensure_registered().await?;

        let claimed = match self.client.get_expression_to_evaluate(agent_id).await {
            Ok(claimed) => claimed,
            Err(CalcError::NoWorkAvailable) => {
                tracing::trace!(agent_id, "No work available");
                return Ok(PollOutcome::Idle);
            }
            Err(e) => {
                self.forget_if_unknown(agent_id, &e);
                return Err(e);
            }
        };
        tracing::info!(agent_id, expression_id = %claimed.id, tokens = claimed.postfix.len(), "Evaluating expression");

        match self.reducer.reduce(&claimed.id, &claimed.postfix).await {
            Ok(result) => {
                self.deliver(Report::Solved {
                    agent_id,
                    expression_id: claimed.id.clone(),
                    result,
                })
                .await?;
                tracing::info!(agent_id, expression_id = %claimed.id, result, "Result reported");
                Ok(PollOutcome::Solved {
                    expression_id: claimed.id,
                    result,
                })
            }
            Err(e) => {
                let invalid = !e.is_recoverable();
                tracing::warn!(agent_id, expression_id = %claimed.id, error = %e, invalid, "Evaluation failed, abandoning");
                self.deliver(Report::Abandoned {
                    agent_id,
                    expression_id: claimed.id.clone(),
                    reason: e.to_string(),
                    invalid,
                })
                .await?;
                Ok(PollOutcome::Abandoned {
                    expression_id: claimed.id,
                    invalid,
                })
            }
        }
    }

    async fn send(&self, report: &Report) -> Result<()> {
        match report {
            Report::Solved {
                agent_id,
                expression_id,
                result,
            } => {
                self.client
                    .give_result_of_expression(expression_id, *result, *agent_id)
                    .await
            }
            Report::Abandoned {
                agent_id,
                expression_id,
                reason,
                invalid,
            } => {
                self.client
                    .abandon_expression(expression_id, *agent_id, reason, *invalid)
                    .await
            }
        }
    }

    /// Send a report, keeping it for one more attempt if it fails.
    async fn deliver(&self, report: Report) -> Result<()> {
        if let Err(e) = self.send(&report).await {
            tracing::warn!(expression_id = report.expression_id(), error = %e, "Report failed, keeping it for the next tick");
            *self.unreported.lock().await = Some(report);
            return Err(e);
        }
        Ok(())
    }

    async fn flush_unreported(&self) {
        let Some(report) = self.unreported.lock().await.take() else {
            return;
        };
        match self.send(&report).await {
            Ok(()) => {
                tracing::info!(expression_id = report.expression_id(), "Delayed report delivered")
            }
            Err(e) => {
                tracing::error!(expression_id = report.expression_id(), error = %e, "Delayed report failed, dropping it")
            }
        }
    }

    /// Run until `shutdown` fires: heartbeat in the background, poll on a
    /// fixed interval, then deregister.
    ///
    /// An expression being evaluated when shutdown fires is finished and
    /// reported before the agent leaves.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        // Dropping the guard stops heartbeats even if this future is dropped
        // mid-poll.
        let heartbeat_stop = shutdown.child_token();
        let stop_heartbeat = heartbeat_stop.clone().drop_guard();
        let heartbeat = self.spawn_heartbeat(heartbeat_stop);
        let mut poll_interval =
            tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll_interval.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "Poll failed");
                    }
                }
            }
        }

        drop(stop_heartbeat);
        let _ = heartbeat.await;
        self.flush_unreported().await;
        if let Some(agent_id) = self.agent_id() {
            match self.client.remove_agent(agent_id).await {
                Ok(()) => tracing::info!(agent_id, "Agent deregistered"),
                Err(e) => tracing::warn!(agent_id, error = %e, "Failed to deregister agent"),
            }
        }
        Ok(())
    }

    fn spawn_heartbeat(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let sender = HeartbeatSender::new(self.config.heartbeat_interval_ms);
        let client = self.client.clone();
        let agent_id = self.agent_id.clone();

        tokio::spawn(async move {
            sender
                .run(shutdown, || {
                    let client = client.clone();
                    let agent_id = agent_id.clone();
                    async move {
                        let id = agent_id.load(Ordering::SeqCst);
                        if id == 0 {
                            return;
                        }
                        if let Err(e) = client.heartbeat(id, true).await {
                            tracing::warn!(agent_id = id, error = %e, "Heartbeat failed");
                            if is_unknown_agent(&e) {
                                let _ = agent_id.compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst);
                            }
                        }
                    }
                })
                .await;
        })
    }

    fn forget_if_unknown(&self, agent_id: u64, error: &CalcError) {
        if is_unknown_agent(error) {
            tracing::warn!(agent_id, "Orchestrator no longer knows this agent, re-registering");
            let _ = self
                .agent_id
                .compare_exchange(agent_id, 0, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
}

fn is_unknown_agent(error: &CalcError) -> bool {
    matches!(error, CalcError::Grpc(status) if status.code() == Code::FailedPrecondition)
}
