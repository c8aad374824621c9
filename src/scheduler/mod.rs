//! Orchestrator-side scheduling.
//!
//! - [`store`]: expressions keyed by fingerprint, with the `new` queue
//! - [`registry`]: registered agents and their liveness
//! - [`orchestrator`]: the atomic operations agents drive over RPC, and the
//!   reaper that reclaims work from agents that went silent

pub mod orchestrator;
pub mod registry;
pub mod store;

pub use orchestrator::{ClaimedExpression, Orchestrator};
pub use registry::{AgentRegistry, AgentState, AgentStatus};
pub use store::ExpressionStore;
