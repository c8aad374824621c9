use std::sync::Arc;
use std::time::Duration;

use crate::config::DurationTable;
use crate::error::{CalcError, Result};
use crate::expression::{ExpressionPart, Operator, Token};
use crate::worker::pool::CalculationPool;

/// Reduces a postfix sequence with a value stack, sending every operator to
/// the calculation pool as one sub-task and waiting for its answer before
/// moving on.
#[derive(Clone)]
pub struct Reducer {
    pool: Arc<CalculationPool>,
    durations: DurationTable,
    subtask_timeout: Duration,
}

impl Reducer {
    pub fn new(pool: Arc<CalculationPool>, durations: DurationTable, subtask_timeout: Duration) -> Self {
        Self {
            pool,
            durations,
            subtask_timeout,
        }
    }

    /// Evaluate `postfix` for the expression `expression_id`.
    ///
    /// An operator without two operands below it, or anything other than a
    /// single value left at the end, fails with `InvalidExpression`.
    pub async fn reduce(&self, expression_id: &str, postfix: &[Token]) -> Result<f64> {
        let mut stack: Vec<f64> = Vec::with_capacity(postfix.len());

        for token in postfix {
            match *token {
                Token::Operand(value) => stack.push(value),
                Token::Operator(op) => {
                    let (second, first) = match (stack.pop(), stack.pop()) {
                        (Some(second), Some(first)) => (second, first),
                        _ => {
                            return Err(CalcError::InvalidExpression(format!(
                                "operator '{}' is missing an operand",
                                op
                            )))
                        }
                    };
                    let value = self.dispatch(expression_id, first, second, op).await?;
                    stack.push(value);
                }
            }
        }

        match stack.as_slice() {
            [value] => Ok(*value),
            values => Err(CalcError::InvalidExpression(format!(
                "postfix sequence reduced to {} values",
                values.len()
            ))),
        }
    }

    async fn dispatch(&self, expression_id: &str, first: f64, second: f64, op: Operator) -> Result<f64> {
        let (part, result_rx) = ExpressionPart::new(
            first,
            second,
            op,
            expression_id.to_string(),
            self.durations.duration_for(op),
        );
        tracing::debug!(expression_id, first, second, op = %op, "Dispatching sub-task");

        let answer = tokio::time::timeout(self.subtask_timeout, async {
            self.pool.submit(part).await?;
            result_rx
                .await
                .map_err(|_| CalcError::WorkerCrash(expression_id.to_string()))
        })
        .await;

        match answer {
            Ok(result) => result,
            Err(_) => Err(CalcError::SubTaskTimeout {
                expression_id: expression_id.to_string(),
                timeout: self.subtask_timeout,
            }),
        }
    }
}
