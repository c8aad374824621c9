//! gRPC surface.
//!
//! Server side: [`agent_service::AgentService`] (the agent protocol) and
//! [`client_service::ClientService`] (submission and lookup), both hosted by
//! [`GrpcServer`]. Agent side: [`agent_client::AgentClient`], which wraps
//! every call in a [`retry::RetryPolicy`].

pub mod agent_client;
pub mod agent_service;
pub mod client_service;
pub mod retry;
pub mod server;

pub use agent_client::AgentClient;
pub use retry::RetryPolicy;
pub use server::GrpcServer;
