//! Wire types for the `calc` gRPC package.
//!
//! Messages are declared directly with prost; the service stubs
//! (`orchestrator_server`, `orchestrator_client`, `calculator_server`,
//! `calculator_client`) are generated by `build.rs`.

use crate::error::CalcError;
use crate::expression::{Operator, Token};

include!(concat!(env!("OUT_DIR"), "/calc.Orchestrator.rs"));
include!(concat!(env!("OUT_DIR"), "/calc.Calculator.rs"));

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct AgentId {
    #[prost(uint64, tag = "1")]
    pub agent_id: u64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct HeartbeatRequest {
    #[prost(uint64, tag = "1")]
    pub agent_id: u64,
    #[prost(bool, tag = "2")]
    pub is_alive: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TokenKind {
    Unspecified = 0,
    Operand = 1,
    Operator = 2,
}

/// One postfix token: an operand in decimal notation or a one-character
/// operator symbol.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpnToken {
    #[prost(enumeration = "TokenKind", tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub value: ::prost::alloc::string::String,
}

/// Answer to a poll. `found == false` means there was nothing to claim.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExpressionTask {
    #[prost(bool, tag = "1")]
    pub found: bool,
    #[prost(string, tag = "2")]
    pub expression_id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub postfix: ::prost::alloc::vec::Vec<RpnToken>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultOfExpression {
    #[prost(string, tag = "1")]
    pub expression_id: ::prost::alloc::string::String,
    #[prost(double, tag = "2")]
    pub result: f64,
    #[prost(uint64, tag = "3")]
    pub agent_id: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AbandonRequest {
    #[prost(string, tag = "1")]
    pub expression_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub agent_id: u64,
    #[prost(string, tag = "3")]
    pub reason: ::prost::alloc::string::String,
    /// Close the expression as invalid instead of re-queueing it.
    #[prost(bool, tag = "4")]
    pub invalid: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitExpressionRequest {
    #[prost(string, tag = "1")]
    pub infix: ::prost::alloc::string::String,
    #[prost(uint64, optional, tag = "2")]
    pub owner_id: ::core::option::Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SubmitExpressionResponse {
    #[prost(string, tag = "1")]
    pub expression_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExpressionId {
    #[prost(string, tag = "1")]
    pub expression_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExpressionInfo {
    #[prost(string, tag = "1")]
    pub expression_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub infix: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub postfix: ::prost::alloc::vec::Vec<RpnToken>,
    /// `new`, `solving-<agent id>`, `solved` or `invalid`
    #[prost(string, tag = "4")]
    pub status: ::prost::alloc::string::String,
    #[prost(double, optional, tag = "5")]
    pub result: ::core::option::Option<f64>,
    #[prost(uint64, optional, tag = "6")]
    pub owner_id: ::core::option::Option<u64>,
    #[prost(int64, tag = "7")]
    pub created_at_ms: i64,
    #[prost(int64, optional, tag = "8")]
    pub solved_at_ms: ::core::option::Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListExpressionsRequest {
    #[prost(uint64, optional, tag = "1")]
    pub owner_id: ::core::option::Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListExpressionsResponse {
    #[prost(message, repeated, tag = "1")]
    pub expressions: ::prost::alloc::vec::Vec<ExpressionInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultResponse {
    #[prost(string, tag = "1")]
    pub expression_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub ready: bool,
    #[prost(double, tag = "3")]
    pub result: f64,
    #[prost(string, tag = "4")]
    pub status: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AgentInfo {
    #[prost(uint64, tag = "1")]
    pub agent_id: u64,
    /// `free` or `solving-<expression id>`
    #[prost(string, tag = "2")]
    pub status: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub last_heartbeat_ms: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListAgentsResponse {
    #[prost(message, repeated, tag = "1")]
    pub agents: ::prost::alloc::vec::Vec<AgentInfo>,
}

impl From<Token> for RpnToken {
    fn from(token: Token) -> Self {
        match token {
            Token::Operand(value) => RpnToken {
                kind: TokenKind::Operand as i32,
                value: value.to_string(),
            },
            Token::Operator(op) => RpnToken {
                kind: TokenKind::Operator as i32,
                value: op.symbol().to_string(),
            },
        }
    }
}

impl TryFrom<RpnToken> for Token {
    type Error = CalcError;

    fn try_from(token: RpnToken) -> Result<Self, Self::Error> {
        match TokenKind::try_from(token.kind) {
            Ok(TokenKind::Operand) => token
                .value
                .parse::<f64>()
                .map(Token::Operand)
                .map_err(|_| {
                    CalcError::InvalidExpression(format!("invalid operand '{}'", token.value))
                }),
            Ok(TokenKind::Operator) => {
                let mut chars = token.value.chars();
                match (chars.next().and_then(Operator::from_symbol), chars.next()) {
                    (Some(op), None) => Ok(Token::Operator(op)),
                    _ => Err(CalcError::InvalidExpression(format!(
                        "invalid operator '{}'",
                        token.value
                    ))),
                }
            }
            _ => Err(CalcError::InvalidExpression(format!(
                "unknown token kind {}",
                token.kind
            ))),
        }
    }
}

pub fn tokens_to_proto(tokens: &[Token]) -> Vec<RpnToken> {
    tokens.iter().copied().map(RpnToken::from).collect()
}

pub fn tokens_from_proto(tokens: Vec<RpnToken>) -> Result<Vec<Token>, CalcError> {
    tokens.into_iter().map(Token::try_from).collect()
}
