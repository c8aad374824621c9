use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::expression::token::{Operator, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpressionStatus {
    /// Waiting to be claimed by an agent.
    New,
    /// Claimed by the agent with this id.
    Solving(u64),
    Solved,
    Invalid,
}

impl ExpressionStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, ExpressionStatus::Solved | ExpressionStatus::Invalid)
    }
}

impl std::fmt::Display for ExpressionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpressionStatus::New => write!(f, "new"),
            ExpressionStatus::Solving(agent_id) => write!(f, "solving-{}", agent_id),
            ExpressionStatus::Solved => write!(f, "solved"),
            ExpressionStatus::Invalid => write!(f, "invalid"),
        }
    }
}

/// A submitted expression as tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expression {
    /// Fingerprint of the normalized infix text.
    pub id: String,
    pub infix: String,
    pub postfix: Vec<Token>,
    pub result: Option<f64>,
    pub status: ExpressionStatus,
    pub owner_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub solved_at: Option<DateTime<Utc>>,
    /// Arrival order in the store; claims go oldest first.
    pub arrival: u64,
}

impl Expression {
    pub fn new(id: String, infix: String, postfix: Vec<Token>, owner_id: Option<u64>) -> Self {
        Self {
            id,
            infix,
            postfix,
            result: None,
            status: ExpressionStatus::New,
            owner_id,
            created_at: Utc::now(),
            solved_at: None,
            arrival: 0,
        }
    }

    pub fn claimed_by(&self) -> Option<u64> {
        match self.status {
            ExpressionStatus::Solving(agent_id) => Some(agent_id),
            _ => None,
        }
    }

    pub fn mark_solved(&mut self, result: f64) {
        self.result = Some(result);
        self.status = ExpressionStatus::Solved;
        self.solved_at = Some(Utc::now());
    }
}

/// One binary sub-task handed to a calculation unit. Never persisted; the
/// result sender is consumed when the unit answers.
#[derive(Debug)]
pub struct ExpressionPart {
    pub first: f64,
    pub second: f64,
    pub operator: Operator,
    pub expression_id: String,
    pub duration: Duration,
    pub result_tx: oneshot::Sender<f64>,
}

impl ExpressionPart {
    pub fn new(
        first: f64,
        second: f64,
        operator: Operator,
        expression_id: String,
        duration: Duration,
    ) -> (Self, oneshot::Receiver<f64>) {
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self {
                first,
                second,
                operator,
                expression_id,
                duration,
                result_tx,
            },
            result_rx,
        )
    }
}
