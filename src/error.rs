//! Error types for Nodeflow.
//!
//! Library-level failures are represented by the `NodeflowError` enum. The structured
//! errors that make up the execution failure taxonomy (`GraphError`, `EvalError`,
//! `NodeError`, `GatewayError`) are serializable so they can be stored on node results.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Nodeflow operations.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum NodeflowError {
    /// Engine-level errors (startup, shutdown, lifecycle).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML).
    #[error("{0}")]
    Convert(String),

    /// Structural workflow errors, reported before any node runs.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Expression resolution errors.
    #[error(transparent)]
    Eval(#[from] EvalError),

    /// Node execution errors.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Inference gateway errors.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Storage operation errors.
    #[error("{0}")]
    Store(String),

    /// Execution lifecycle errors.
    #[error("{0}")]
    Execution(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),
}

impl From<NodeflowError> for String {
    fn from(val: NodeflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for NodeflowError {
    fn from(error: std::io::Error) -> Self {
        NodeflowError::IoError(error.to_string())
    }
}

impl From<NodeflowError> for std::io::Error {
    fn from(val: NodeflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for NodeflowError {
    fn from(_: FromUtf8Error) -> Self {
        NodeflowError::Convert("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for NodeflowError {
    fn from(error: serde_json::Error) -> Self {
        NodeflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for NodeflowError {
    fn from(error: toml::de::Error) -> Self {
        NodeflowError::Config(error.to_string())
    }
}

/// Category of a structural workflow error.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GraphErrorKind {
    DanglingReference,
    Cycle,
    UnknownNodeType,
    OrphanNode,
    InvalidConfig,
}

/// A structural problem found while validating a workflow definition.
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq, Eq)]
#[error("graph error ({kind}): {message}")]
pub struct GraphError {
    pub kind: GraphErrorKind,
    /// Node the problem is attached to, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub message: String,
}

impl GraphError {
    pub fn new(
        kind: GraphErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            node: None,
            message: message.into(),
        }
    }

    pub fn at(
        kind: GraphErrorKind,
        node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            node: Some(node.into()),
            message: message.into(),
        }
    }
}

/// Category of an expression resolution error.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EvalErrorKind {
    UnknownReference,
    TypeMismatch,
    FunctionError,
    Syntax,
}

/// Failure to resolve a `{{ ... }}` expression.
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq)]
#[error("eval error ({kind}): {message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    /// Classification carried over from a provider failure inside an AI-backed function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<NodeErrorKind>,
}

impl EvalError {
    pub fn new(
        kind: EvalErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn unknown_reference(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::UnknownReference, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::TypeMismatch, message)
    }

    pub fn function(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::FunctionError, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Syntax, message)
    }
}

/// Category of a node failure, used by the retry policy to pick a verdict.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeErrorKind {
    ConnectionError,
    AuthError,
    RateLimited,
    ValidationError,
    ServerError,
    ExecutionError,
    ResourceError,
}

impl NodeErrorKind {
    /// Whether retrying the same call can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, NodeErrorKind::AuthError | NodeErrorKind::ValidationError)
    }
}

/// Domain failure raised by a node's execute contract.
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct NodeError {
    pub kind: NodeErrorKind,
    pub message: String,
    /// Server-provided hint for rate-limited calls, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl NodeError {
    pub fn new(
        kind: NodeErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::ConnectionError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::AuthError, message)
    }

    pub fn rate_limited(
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        Self {
            kind: NodeErrorKind::RateLimited,
            message: message.into(),
            retry_after_ms,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::ValidationError, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::ServerError, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::ExecutionError, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(NodeErrorKind::ResourceError, message)
    }

    /// Timeouts are classified as connection errors for policy purposes.
    pub fn timeout(after_ms: u128) -> Self {
        Self::connection(format!("timed out after {after_ms}ms"))
    }

    /// Classify an HTTP status code returned by a remote service.
    pub fn from_status(
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::auth(message),
            429 => Self::rate_limited(message, None),
            400..=499 => Self::validation(message),
            _ => Self::server(message),
        }
    }
}

impl From<EvalError> for NodeError {
    fn from(err: EvalError) -> Self {
        let kind = err.cause.unwrap_or(NodeErrorKind::ValidationError);
        NodeError::new(kind, err.to_string())
    }
}

impl From<GatewayError> for NodeError {
    fn from(err: GatewayError) -> Self {
        NodeError::server(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::validation(err.to_string())
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return NodeError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return NodeError::connection(err.to_string());
        }
        if err.is_decode() {
            return NodeError::server(err.to_string());
        }
        NodeError::execution(err.to_string())
    }
}

/// Category of an inference gateway failure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GatewayErrorKind {
    AllProvidersFailed,
    NoProviders,
}

/// One failed provider attempt inside a gateway call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProviderAttempt {
    pub provider: String,
    pub kind: NodeErrorKind,
    pub message: String,
    pub duration_ms: u64,
}

/// Returned when no provider in the chain produced a response.
#[derive(Serialize, Deserialize, Error, Debug, Clone, PartialEq)]
#[error("gateway error ({kind}): {}", summarize_attempts(.attempts))]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub attempts: Vec<ProviderAttempt>,
}

fn summarize_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no providers attempted".to_string();
    }
    attempts.iter().map(|a| format!("{} -> {}: {}", a.provider, a.kind, a.message)).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(NodeError::from_status(401, "x").kind, NodeErrorKind::AuthError);
        assert_eq!(NodeError::from_status(429, "x").kind, NodeErrorKind::RateLimited);
        assert_eq!(NodeError::from_status(422, "x").kind, NodeErrorKind::ValidationError);
        assert_eq!(NodeError::from_status(503, "x").kind, NodeErrorKind::ServerError);
    }

    #[test]
    fn test_eval_error_keeps_provider_cause() {
        let mut err = EvalError::function("summarize failed");
        assert_eq!(NodeError::from(err.clone()).kind, NodeErrorKind::ValidationError);

        err.cause = Some(NodeErrorKind::RateLimited);
        assert_eq!(NodeError::from(err).kind, NodeErrorKind::RateLimited);
    }

    #[test]
    fn test_gateway_error_surfaces_as_server_error() {
        let err = GatewayError {
            kind: GatewayErrorKind::AllProvidersFailed,
            attempts: vec![ProviderAttempt {
                provider: "local".to_string(),
                kind: NodeErrorKind::ConnectionError,
                message: "refused".to_string(),
                duration_ms: 3,
            }],
        };
        let node_err = NodeError::from(err);
        assert_eq!(node_err.kind, NodeErrorKind::ServerError);
        assert!(node_err.message.contains("local -> connection_error: refused"));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(NodeErrorKind::ConnectionError.is_transient());
        assert!(NodeErrorKind::RateLimited.is_transient());
        assert!(!NodeErrorKind::AuthError.is_transient());
        assert!(!NodeErrorKind::ValidationError.is_transient());
    }
}
