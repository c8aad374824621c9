use std::collections::{BTreeMap, HashMap};

use crate::error::{CalcError, Result};
use crate::expression::{fingerprint, parse, Expression, ExpressionStatus};

const DEFAULT_MAX_EXPRESSIONS: usize = 10_000;

/// In-memory expression store: one row per fingerprint plus an index of
/// the rows waiting to be claimed, ordered by arrival.
#[derive(Debug)]
pub struct ExpressionStore {
    expressions: HashMap<String, Expression>,
    /// arrival → id for every row in state `new`
    pending: BTreeMap<u64, String>,
    next_arrival: u64,
    max_expressions: usize,
}

impl Default for ExpressionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_EXPRESSIONS)
    }

    pub fn with_capacity(max_expressions: usize) -> Self {
        Self {
            expressions: HashMap::new(),
            pending: BTreeMap::new(),
            next_arrival: 0,
            max_expressions,
        }
    }

    /// Parse and store an infix expression, returning its fingerprint.
    ///
    /// Resubmitting an expression that is already stored (up to whitespace)
    /// returns the existing id and leaves the row untouched.
    pub fn submit(&mut self, infix: &str, owner_id: Option<u64>) -> Result<String> {
        let postfix = parse(infix)?;
        let id = fingerprint(infix);

        if self.expressions.contains_key(&id) {
            tracing::debug!(expression_id = %id, "Expression already stored");
            return Ok(id);
        }
        if self.is_full() {
            return Err(CalcError::StoreFull);
        }

        let mut expression = Expression::new(id.clone(), infix.trim().to_string(), postfix, owner_id);
        expression.arrival = self.next_arrival;
        self.next_arrival += 1;

        self.pending.insert(expression.arrival, id.clone());
        self.expressions.insert(id.clone(), expression);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<&Expression> {
        self.expressions.get(id)
    }

    /// Result of a solved expression.
    pub fn result(&self, id: &str) -> Result<f64> {
        let expression = self
            .get(id)
            .ok_or_else(|| CalcError::ExpressionNotFound(id.to_string()))?;
        match (expression.status, expression.result) {
            (ExpressionStatus::Solved, Some(result)) => Ok(result),
            (ExpressionStatus::Invalid, _) => Err(CalcError::InvalidExpression(format!(
                "expression {} was marked invalid",
                id
            ))),
            _ => Err(CalcError::ResultNotReady(id.to_string())),
        }
    }

    /// Expressions submitted by `owner_id`, oldest first.
    pub fn list_for_owner(&self, owner_id: u64) -> Vec<&Expression> {
        let mut expressions: Vec<&Expression> = self
            .expressions
            .values()
            .filter(|e| e.owner_id == Some(owner_id))
            .collect();
        expressions.sort_by_key(|e| e.arrival);
        expressions
    }

    /// All expressions, oldest first.
    pub fn all(&self) -> Vec<&Expression> {
        let mut expressions: Vec<&Expression> = self.expressions.values().collect();
        expressions.sort_by_key(|e| e.arrival);
        expressions
    }

    /// Oldest expression in state `new`, if any.
    pub fn next_pending(&self) -> Option<&Expression> {
        self.pending
            .values()
            .next()
            .and_then(|id| self.expressions.get(id))
    }

    /// Oldest expression in state `new` whose id is not in `skip`.
    pub fn next_pending_excluding(&self, skip: &[String]) -> Option<&Expression> {
        self.pending
            .values()
            .find(|id| !skip.contains(id))
            .and_then(|id| self.expressions.get(id))
    }

    pub fn mark_solving(&mut self, id: &str, agent_id: u64) -> bool {
        self.set_status(id, ExpressionStatus::Solving(agent_id))
    }

    pub fn mark_invalid(&mut self, id: &str) -> bool {
        self.set_status(id, ExpressionStatus::Invalid)
    }

    /// Put an expression back in the queue at its original position.
    pub fn mark_new(&mut self, id: &str) -> bool {
        self.set_status(id, ExpressionStatus::New)
    }

    /// Record a result. Solved rows are never touched again, and invalid
    /// rows do not accept results.
    pub fn mark_solved(&mut self, id: &str, result: f64) -> Result<()> {
        let expression = self
            .expressions
            .get_mut(id)
            .ok_or_else(|| CalcError::ExpressionNotFound(id.to_string()))?;
        match expression.status {
            ExpressionStatus::Solved => Ok(()),
            ExpressionStatus::Invalid => Err(CalcError::InvalidExpression(format!(
                "expression {} was marked invalid",
                id
            ))),
            ExpressionStatus::New | ExpressionStatus::Solving(_) => {
                self.pending.remove(&expression.arrival);
                expression.mark_solved(result);
                Ok(())
            }
        }
    }

    /// Ids of every expression currently claimed by `agent_id`.
    pub fn claimed_by(&self, agent_id: u64) -> Vec<String> {
        self.expressions
            .values()
            .filter(|e| e.claimed_by() == Some(agent_id))
            .map(|e| e.id.clone())
            .collect()
    }

    /// Transition a non-final row. Returns false for unknown ids and for
    /// rows that are already solved or invalid.
    fn set_status(&mut self, id: &str, status: ExpressionStatus) -> bool {
        let Some(expression) = self.expressions.get_mut(id) else {
            return false;
        };
        if expression.status.is_final() {
            return false;
        }
        expression.status = status;
        if status == ExpressionStatus::New {
            self.pending.insert(expression.arrival, expression.id.clone());
        } else {
            self.pending.remove(&expression.arrival);
        }
        true
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.expressions.len() >= self.max_expressions
    }
}
