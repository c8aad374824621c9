pub mod agent;
pub mod config;
pub mod error;
pub mod expression;
pub mod grpc;
pub mod node;
pub mod proto;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
