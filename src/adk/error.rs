// SPDX-License-Identifier: MIT

//! Typed error handling for nodeflow-rs
//!
//! Two layers live here:
//! - leaf errors raised by the variable pool and the provider clients
//!   (`PoolError`, `ModelError`, `KnowledgeError`)
//! - `ExecutionError`, the classification every node failure is folded into
//!   before it is attached to a `RunResult` and to the tracing span.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

/// Shared, cloneable handle to the error that caused a classified failure
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Top-level error type for loading, building and running nodes
#[derive(Debug, Error)]
pub enum FlowError {
    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid node definition
    #[error("Node definition error: {0}")]
    Definition(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl FlowError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a node definition error
    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition(message.into())
    }
}

/// Variable pool errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PoolError {
    /// No value published or bound for this key
    #[error("variable '{key}' not found for node '{node_id}'")]
    KeyNotFound { node_id: String, key: String },

    /// A path expression could not be walked to the end
    #[error("cannot resolve '{expression}': {reason}")]
    ResolutionFailure { expression: String, reason: String },
}

impl PoolError {
    pub fn key_not_found(node_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::KeyNotFound {
            node_id: node_id.into(),
            key: key.into(),
        }
    }

    pub fn resolution(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResolutionFailure {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// LLM provider errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Non-success HTTP status from the provider
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),

    /// Transport failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Knowledge retrieval provider errors
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Recall endpoint not configured
    #[error("knowledge recall URL is not configured")]
    MissingEndpoint,

    /// Non-success HTTP status from the recall service
    #[error("knowledge service returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Body could not be interpreted
    #[error("Invalid response from knowledge service: {0}")]
    InvalidResponse(String),

    /// Transport failure
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Classified failure of a single node execution
///
/// Every error that escapes a node's run is mapped onto one of these variants
/// before the `RunResult` is built. The original cause, when there is one, is
/// kept as the error source so the full chain survives for diagnostics.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("knowledge retrieval failed: {message}")]
    KnowledgeRetrieval {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    #[error("LLM invocation failed: {message}")]
    LlmInvocation {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    #[error("response could not be parsed: {message}")]
    ResponseParse {
        message: String,
        #[source]
        cause: Option<Cause>,
    },

    #[error("node execution cancelled")]
    Cancelled,

    #[error("node execution failed: {message}")]
    Unclassified {
        message: String,
        #[source]
        cause: Option<Cause>,
    },
}

impl ExecutionError {
    pub fn knowledge<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::KnowledgeRetrieval {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    pub fn llm<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::LlmInvocation {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    pub fn parse<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::ResponseParse {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    pub fn unclassified<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Unclassified {
            message: err.to_string(),
            cause: Some(Arc::new(err)),
        }
    }

    /// Create an error without an underlying cause
    pub fn unclassified_msg(message: impl Into<String>) -> Self {
        Self::Unclassified {
            message: message.into(),
            cause: None,
        }
    }

    /// Stable classification code exposed to callers
    pub fn code(&self) -> u32 {
        match self {
            Self::KnowledgeRetrieval { .. } => 20_501,
            Self::LlmInvocation { .. } => 20_502,
            Self::ResponseParse { .. } => 20_503,
            Self::Cancelled => 20_504,
            Self::Unclassified { .. } => 20_599,
        }
    }

    /// Short machine-friendly name of the classification
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KnowledgeRetrieval { .. } => "KnowledgeRetrievalFailure",
            Self::LlmInvocation { .. } => "LLMInvocationFailure",
            Self::ResponseParse { .. } => "ResponseParseFailure",
            Self::Cancelled => "Cancelled",
            Self::Unclassified { .. } => "Unclassified",
        }
    }

    /// Human-readable chain: this error followed by each source, outermost first
    pub fn cause_chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(err) = source {
            let text = err.to_string();
            // constructors copy the cause's message into the variant
            if !out.ends_with(&text) {
                let _ = write!(out, ": {}", text);
            }
            source = err.source();
        }
        out
    }
}

/// Raised when a node is invoked in a mode it does not support
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UnsupportedError {
    #[error("node '{node_id}' only supports asynchronous execution")]
    SyncExecution { node_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            ExecutionError::knowledge(KnowledgeError::MissingEndpoint),
            ExecutionError::llm(ModelError::ApiKeyMissing("openai".into())),
            ExecutionError::parse(PoolError::key_not_found("n", "k")),
            ExecutionError::Cancelled,
            ExecutionError::unclassified_msg("boom"),
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), 5);
    }

    #[test]
    fn test_cause_chain_includes_source() {
        let err = ExecutionError::unclassified(PoolError::resolution("A.c", "key 'c' missing"));
        let chain = err.cause_chain();
        assert_eq!(
            chain,
            "node execution failed: cannot resolve 'A.c': key 'c' missing"
        );
        assert!(err.source().is_some());
        assert_eq!(err.kind(), "Unclassified");
    }

    #[test]
    fn test_unclassified_without_cause_has_no_source() {
        let err = ExecutionError::unclassified_msg("plain");
        assert!(err.source().is_none());
        assert_eq!(err.cause_chain(), "node execution failed: plain");
    }

    #[test]
    fn test_flow_error_helpers() {
        assert_eq!(
            FlowError::config("missing key").to_string(),
            "Configuration error: missing key"
        );
        assert_eq!(
            FlowError::definition("empty id").to_string(),
            "Node definition error: empty id"
        );
    }
}
