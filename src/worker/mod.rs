//! Agent-side evaluation engine.
//!
//! - [`pool`]: [`CalculationPool`], the fixed set of supervised calculation
//!   units that solve one binary sub-task at a time with simulated latency
//! - [`reducer`]: [`Reducer`], which walks a postfix sequence and hands each
//!   operator to the pool, waiting on every answer (with a timeout)
//! - [`heartbeat`]: periodic liveness signal towards the orchestrator
//!
//! # Flow
//!
//! 1. The agent claims an expression and receives its postfix tokens
//! 2. [`Reducer::reduce`] pushes operands and, per operator, submits an
//!    [`ExpressionPart`](crate::expression::ExpressionPart) to the pool
//! 3. A free unit pulls the part, sleeps for the operator's duration,
//!    computes `first <op> second` and answers on the part's result channel
//! 4. The single value left on the stack is the expression's result

pub mod heartbeat;
pub mod pool;
pub mod reducer;

pub use heartbeat::HeartbeatSender;
pub use pool::{CalculationPool, Evaluator, UnitStats};
pub use reducer::Reducer;
