use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalcError {
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("No expression available to evaluate")]
    NoWorkAvailable,

    #[error("Expression not found: {0}")]
    ExpressionNotFound(String),

    #[error("Result of expression {0} is not ready")]
    ResultNotReady(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(u64),

    #[error("Agent {0} lost")]
    AgentLost(u64),

    #[error("Expression store is at capacity")]
    StoreFull,

    #[error("Sub-task of expression {expression_id} timed out after {timeout:?}")]
    SubTaskTimeout {
        expression_id: String,
        timeout: Duration,
    },

    #[error("Calculation unit crashed while solving a part of expression {0}")]
    WorkerCrash(String),

    #[error("Calculation pool is closed")]
    PoolClosed,

    #[error("{op} failed after {attempts} attempts: {status}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        status: tonic::Status,
    },

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CalcError {
    /// Whether an agent may give the expression back for another attempt.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CalcError::SubTaskTimeout { .. } | CalcError::WorkerCrash(_) | CalcError::PoolClosed
        )
    }
}

impl From<CalcError> for tonic::Status {
    fn from(err: CalcError) -> Self {
        match err {
            CalcError::InvalidExpression(msg) => tonic::Status::invalid_argument(msg),
            CalcError::ExpressionNotFound(id) => {
                tonic::Status::not_found(format!("Expression not found: {}", id))
            }
            CalcError::AgentNotFound(id) => {
                tonic::Status::failed_precondition(format!("Agent {} is not registered", id))
            }
            CalcError::ResultNotReady(id) => {
                tonic::Status::unavailable(format!("Result of expression {} is not ready", id))
            }
            CalcError::StoreFull => tonic::Status::resource_exhausted("Expression store is at capacity"),
            CalcError::Grpc(status) => status,
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CalcError>;
