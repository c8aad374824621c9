//! Arithmetic expression model.
//!
//! - [`token`]: the postfix [`Token`] sum type
//! - [`parser`]: infix → postfix conversion, validation and fingerprinting
//! - [`model`]: orchestrator-side [`Expression`] rows and agent-side
//!   [`ExpressionPart`] sub-tasks

pub mod model;
pub mod parser;
pub mod token;

pub use model::{Expression, ExpressionPart, ExpressionStatus};
pub use parser::{evaluate_postfix, fingerprint, parse};
pub use token::{Operator, Token};
