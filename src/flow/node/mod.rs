// SPDX-License-Identifier: MIT

//! Node module - executable workflow nodes
//!
//! This module provides the core [`Node`] trait and its implementations:
//! - [`LlmNode`] - renders a prompt, calls a chat model and parses the answer
//! - [`KnowledgeNode`] - top-N recall against a knowledge service
//!
//! Every execution walks `Pending -> Running -> {Succeeded, Failed}` through an
//! [`Execution`] tracker. The terminal step consumes the tracker, so a
//! [`RunResult`] is produced exactly once and can no longer change.

mod knowledge;
mod llm;

pub use knowledge::{KnowledgeConfig, KnowledgeNode};
pub use llm::{LlmConfig, LlmNode};

use crate::adk::error::{ExecutionError, UnsupportedError};
use crate::adk::model::TokenUsage;
use crate::adk::trace::Span;
use crate::flow::pool::VariablePool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Llm,
    Knowledge,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Llm => write!(f, "llm"),
            Self::Knowledge => write!(f, "knowledge"),
        }
    }
}

/// Execution modes a node supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionCapability {
    AsyncOnly,
    SyncAndAsync,
}

/// Lifecycle state of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether `self -> next` is a legal move
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

/// Identity shared by every node kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: String,
    pub alias_name: String,
    pub node_type: NodeType,
}

impl NodeMeta {
    pub fn new(id: impl Into<String>, alias_name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            alias_name: alias_name.into(),
            node_type,
        }
    }
}

/// Run-scoped collaborators handed to a node execution
#[derive(Clone, Copy)]
pub struct NodeContext<'a> {
    pub pool: &'a VariablePool,
    pub span: &'a dyn Span,
    pub cancel: &'a CancellationToken,
    pub flow_id: &'a str,
}

impl<'a> NodeContext<'a> {
    pub fn new(
        pool: &'a VariablePool,
        span: &'a dyn Span,
        cancel: &'a CancellationToken,
        flow_id: &'a str,
    ) -> Self {
        Self {
            pool,
            span,
            cancel,
            flow_id,
        }
    }
}

/// Immutable outcome of one node execution
///
/// Built only by [`Execution::succeed`] and [`Execution::fail`]: a succeeded
/// result always has outputs and no error, a failed one the reverse.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    node_id: String,
    alias_name: String,
    node_type: NodeType,
    status: NodeStatus,
    inputs: Map<String, Value>,
    process_data: Map<String, Value>,
    outputs: Option<Map<String, Value>>,
    raw_output: String,
    #[serde(serialize_with = "serialize_error")]
    error: Option<ExecutionError>,
    token_usage: TokenUsage,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
}

fn serialize_error<S: Serializer>(
    error: &Option<ExecutionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        None => serializer.serialize_none(),
        Some(err) => json!({
            "code": err.code(),
            "kind": err.kind(),
            "message": err.cause_chain(),
        })
        .serialize(serializer),
    }
}

impl RunResult {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn alias_name(&self) -> &str {
        &self.alias_name
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Succeeded
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    pub fn process_data(&self) -> &Map<String, Value> {
        &self.process_data
    }

    /// Present only when the execution succeeded
    pub fn outputs(&self) -> Option<&Map<String, Value>> {
        self.outputs.as_ref()
    }

    pub fn raw_output(&self) -> &str {
        &self.raw_output
    }

    /// Present only when the execution failed
    pub fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.token_usage
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

/// In-flight execution of a node
///
/// Collects what the node gathered so far; whatever was recorded before a
/// failure still ends up in the failed [`RunResult`].
#[derive(Debug)]
pub struct Execution {
    meta: NodeMeta,
    status: NodeStatus,
    started_at: DateTime<Utc>,
    inputs: Map<String, Value>,
    process_data: Map<String, Value>,
    raw_output: String,
    token_usage: TokenUsage,
}

impl Execution {
    fn new(meta: &NodeMeta) -> Self {
        Self {
            meta: meta.clone(),
            status: NodeStatus::Pending,
            started_at: Utc::now(),
            inputs: Map::new(),
            process_data: Map::new(),
            raw_output: String::new(),
            token_usage: TokenUsage::default(),
        }
    }

    fn advance(&mut self, next: NodeStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.status,
            next
        );
        self.status = next;
    }

    /// Create the tracker and move it to `Running`
    pub fn start(meta: &NodeMeta) -> Self {
        let mut exec = Self::new(meta);
        exec.advance(NodeStatus::Running);
        log::debug!("Node '{}' ({}) running", meta.id, meta.node_type);
        exec
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn record_input(&mut self, key: impl Into<String>, value: Value) {
        self.inputs.insert(key.into(), value);
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    pub fn record_process_data(&mut self, key: impl Into<String>, value: Value) {
        self.process_data.insert(key.into(), value);
    }

    pub fn set_raw_output(&mut self, raw: impl Into<String>) {
        self.raw_output = raw.into();
    }

    pub fn set_token_usage(&mut self, usage: TokenUsage) {
        self.token_usage = usage;
    }

    /// Terminal success; the caller has already published `outputs`
    pub fn succeed(mut self, outputs: Map<String, Value>) -> RunResult {
        self.advance(NodeStatus::Succeeded);
        log::info!(
            "Node '{}' succeeded with {} output(s)",
            self.meta.id,
            outputs.len()
        );
        self.finish(Some(outputs), None)
    }

    /// Terminal failure: reports the error on the span and builds the result
    pub fn fail(mut self, error: ExecutionError, span: &dyn Span) -> RunResult {
        self.advance(NodeStatus::Failed);
        log::error!(
            "Node '{}' failed [{}]: {}",
            self.meta.id,
            error.code(),
            error.cause_chain()
        );
        span.add_error_event(&format!("{} ({}): {}", error.kind(), error.code(), error));
        span.record_exception(&error);
        self.finish(None, Some(error))
    }

    fn finish(
        self,
        outputs: Option<Map<String, Value>>,
        error: Option<ExecutionError>,
    ) -> RunResult {
        RunResult {
            node_id: self.meta.id,
            alias_name: self.meta.alias_name,
            node_type: self.meta.node_type,
            status: self.status,
            inputs: self.inputs,
            process_data: self.process_data,
            outputs,
            raw_output: self.raw_output,
            error,
            token_usage: self.token_usage,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Core trait for all node types
#[async_trait]
pub trait Node: Send + Sync {
    fn meta(&self) -> &NodeMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn node_type(&self) -> NodeType {
        self.meta().node_type
    }

    fn capability(&self) -> ExecutionCapability {
        ExecutionCapability::AsyncOnly
    }

    /// Node-specific work; returns the ordered outputs to publish
    async fn run(
        &self,
        ctx: &NodeContext<'_>,
        exec: &mut Execution,
    ) -> Result<Map<String, Value>, ExecutionError>;

    /// Run the node once and fold every failure into a `RunResult`
    async fn execute(&self, ctx: &NodeContext<'_>) -> RunResult {
        let mut exec = Execution::start(self.meta());
        match self.run(ctx, &mut exec).await {
            Ok(outputs) => {
                ctx.pool.publish(self.id(), &outputs);
                exec.succeed(outputs)
            }
            Err(err) => exec.fail(err, ctx.span),
        }
    }

    /// Blocking execution; async-only nodes reject it without touching `ctx`.
    ///
    /// Must not be called from inside a tokio runtime worker.
    fn execute_sync(&self, ctx: &NodeContext<'_>) -> Result<RunResult, UnsupportedError> {
        match self.capability() {
            ExecutionCapability::AsyncOnly => Err(UnsupportedError::SyncExecution {
                node_id: self.id().to_string(),
            }),
            ExecutionCapability::SyncAndAsync => Ok(futures::executor::block_on(self.execute(ctx))),
        }
    }
}

/// Read every declared input, recording each one as it is resolved
pub(crate) fn gather_inputs(
    ctx: &NodeContext<'_>,
    node_id: &str,
    keys: &[String],
    exec: &mut Execution,
) -> Result<(), ExecutionError> {
    for key in keys {
        let value = ctx
            .pool
            .get(node_id, key)
            .map_err(ExecutionError::unclassified)?;
        exec.record_input(key.clone(), value);
    }
    Ok(())
}

/// Await a provider call unless the run is cancelled first
pub(crate) async fn call_provider<T, E, F>(
    cancel: &CancellationToken,
    call: F,
    classify: fn(E) -> ExecutionError,
) -> Result<T, ExecutionError>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
        res = call => res.map_err(classify),
    }
}
