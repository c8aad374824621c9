use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Free,
    Solving,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Free => write!(f, "free"),
            AgentStatus::Solving => write!(f, "solving"),
        }
    }
}

/// Orchestrator-side view of one agent.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub id: u64,
    pub status: AgentStatus,
    /// Expression the agent is working on, when `Solving`.
    pub expression_id: Option<String>,
    pub last_heartbeat: Instant,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl AgentState {
    pub fn new(id: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: AgentStatus::Free,
            expression_id: None,
            last_heartbeat: Instant::now(),
            last_heartbeat_at: now,
            registered_at: now,
        }
    }

    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
        self.last_heartbeat_at = Utc::now();
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() < timeout
    }

    /// `free` or `solving-<expression id>`.
    pub fn status_label(&self) -> String {
        match (&self.status, &self.expression_id) {
            (AgentStatus::Solving, Some(id)) => format!("solving-{}", id),
            (status, _) => status.to_string(),
        }
    }
}

/// Registered agents keyed by id. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct AgentRegistry {
    agents: BTreeMap<u64, AgentState>,
    next_id: u64,
    agent_timeout: Duration,
}

impl AgentRegistry {
    pub fn new(agent_timeout_ms: u64) -> Self {
        Self {
            agents: BTreeMap::new(),
            next_id: 1,
            agent_timeout: Duration::from_millis(agent_timeout_ms),
        }
    }

    pub fn register(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.agents.insert(id, AgentState::new(id));
        tracing::info!(agent_id = id, "Agent registered");
        id
    }

    pub fn remove(&mut self, agent_id: u64) -> Option<AgentState> {
        self.agents.remove(&agent_id)
    }

    /// Returns false if the agent is unknown.
    pub fn heartbeat(&mut self, agent_id: u64) -> bool {
        match self.agents.get_mut(&agent_id) {
            Some(agent) => {
                agent.update_heartbeat();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, agent_id: u64) -> Option<&AgentState> {
        self.agents.get(&agent_id)
    }

    pub fn contains(&self, agent_id: u64) -> bool {
        self.agents.contains_key(&agent_id)
    }

    pub fn mark_solving(&mut self, agent_id: u64, expression_id: &str) {
        if let Some(agent) = self.agents.get_mut(&agent_id) {
            agent.status = AgentStatus::Solving;
            agent.expression_id = Some(expression_id.to_string());
        }
    }

    pub fn mark_free(&mut self, agent_id: u64) {
        if let Some(agent) = self.agents.get_mut(&agent_id) {
            agent.status = AgentStatus::Free;
            agent.expression_id = None;
        }
    }

    /// All agents ordered by id.
    pub fn all(&self) -> Vec<&AgentState> {
        self.agents.values().collect()
    }

    /// Agents whose last heartbeat is older than the liveness window.
    pub fn stale_agents(&self) -> Vec<u64> {
        self.agents
            .values()
            .filter(|a| !a.is_alive(self.agent_timeout))
            .map(|a| a.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
