use std::net::SocketAddr;
use std::time::Duration;

use crate::expression::Operator;

/// Simulated cost of each operator, applied by calculation units.
///
/// The lookup is a pure function of the operator so every sub-task with the
/// same symbol costs the same within one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationTable {
    pub plus: Duration,
    pub minus: Duration,
    pub multiply: Duration,
    pub divide: Duration,
    pub power: Duration,
}

impl Default for DurationTable {
    fn default() -> Self {
        Self {
            plus: Duration::from_secs(1),
            minus: Duration::from_secs(1),
            multiply: Duration::from_secs(2),
            divide: Duration::from_secs(2),
            power: Duration::from_secs(3),
        }
    }
}

impl DurationTable {
    /// Same duration for every operator. Handy for tests.
    pub fn uniform(duration: Duration) -> Self {
        Self {
            plus: duration,
            minus: duration,
            multiply: duration,
            divide: duration,
            power: duration,
        }
    }

    pub fn duration_for(&self, op: Operator) -> Duration {
        match op {
            Operator::Add => self.plus,
            Operator::Sub => self.minus,
            Operator::Mul => self.multiply,
            Operator::Div => self.divide,
            Operator::Pow => self.power,
        }
    }

    /// Parse overrides in the form `"+=1000,*=2500"` (milliseconds).
    /// Operators not mentioned keep their current duration.
    pub fn with_overrides(mut self, spec: &str) -> Result<Self, String> {
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (symbol, millis) = entry
                .split_once('=')
                .ok_or_else(|| format!("invalid duration entry '{}', expected op=ms", entry))?;
            let op = symbol
                .trim()
                .chars()
                .next()
                .and_then(Operator::from_symbol)
                .filter(|_| symbol.trim().len() == 1)
                .ok_or_else(|| format!("unknown operator '{}'", symbol.trim()))?;
            let millis: u64 = millis
                .trim()
                .parse()
                .map_err(|_| format!("invalid milliseconds '{}' for '{}'", millis.trim(), op))?;
            let duration = Duration::from_millis(millis);
            match op {
                Operator::Add => self.plus = duration,
                Operator::Sub => self.minus = duration,
                Operator::Mul => self.multiply = duration,
                Operator::Div => self.divide = duration,
                Operator::Pow => self.power = duration,
            }
        }
        Ok(self)
    }
}

/// Client-side retry policy for agent → orchestrator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one.
    pub max_attempts: u32,
    pub per_attempt_timeout_ms: u64,
    /// Fixed pause between attempts.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout_ms: 5_000,
            backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub listen_addr: SocketAddr,
    /// Agents silent for longer than this are considered lost.
    pub agent_timeout_ms: u64,
    pub reap_interval_ms: u64,
    pub max_expressions: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:50051"
                .parse()
                .expect("default listen address is valid"),
            agent_timeout_ms: 30_000,
            reap_interval_ms: 5_000,
            max_expressions: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_agent_timeout_ms(mut self, agent_timeout_ms: u64) -> Self {
        self.agent_timeout_ms = agent_timeout_ms;
        self
    }

    pub fn with_reap_interval_ms(mut self, reap_interval_ms: u64) -> Self {
        self.reap_interval_ms = reap_interval_ms;
        self
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Orchestrator endpoint, e.g. `http://127.0.0.1:50051`.
    pub orchestrator_addr: String,
    pub calculation_units: usize,
    pub durations: DurationTable,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub subtask_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            orchestrator_addr: "http://127.0.0.1:50051".to_string(),
            calculation_units: 4,
            durations: DurationTable::default(),
            poll_interval_ms: 10_000,
            heartbeat_interval_ms: 5_000,
            subtask_timeout_ms: 60_000,
            retry: RetryConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn new(orchestrator_addr: impl Into<String>) -> Self {
        Self {
            orchestrator_addr: orchestrator_addr.into(),
            ..Default::default()
        }
    }

    pub fn with_calculation_units(mut self, units: usize) -> Self {
        self.calculation_units = units;
        self
    }

    pub fn with_durations(mut self, durations: DurationTable) -> Self {
        self.durations = durations;
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, heartbeat_interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = heartbeat_interval_ms;
        self
    }

    pub fn with_subtask_timeout_ms(mut self, subtask_timeout_ms: u64) -> Self {
        self.subtask_timeout_ms = subtask_timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
