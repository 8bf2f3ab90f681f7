// SPDX-License-Identifier: MIT

//! Run-scoped variable pool
//!
//! Values are partitioned by node id. A node publishes under its own id and
//! reads declared inputs through bindings that point at other nodes' outputs.
//! One coarse `RwLock` protects the map; writers never share a partition, so
//! contention is limited to the insertion itself.

use crate::adk::error::PoolError;
use crate::adk::model::HistoryTurn;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Bindings may chain through other bindings; this caps the walk
const MAX_BINDING_HOPS: usize = 16;

/// Where a declared input takes its value from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "lowercase")]
pub enum InputSource {
    /// Output `name` of node `node_id`
    Ref {
        #[serde(rename = "nodeId")]
        node_id: String,
        name: String,
    },
    /// Constant value
    Literal(Value),
}

/// A declared input of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub name: String,
    #[serde(rename = "value")]
    pub source: InputSource,
}

impl InputBinding {
    pub fn reference(
        name: impl Into<String>,
        node_id: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: InputSource::Ref {
                node_id: node_id.into(),
                name: key.into(),
            },
        }
    }

    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            source: InputSource::Literal(value),
        }
    }
}

#[derive(Debug, Default)]
struct NodeScope {
    values: Map<String, Value>,
    bindings: HashMap<String, InputSource>,
    history: Vec<HistoryTurn>,
}

/// Keyed store of node outputs for one workflow run
#[derive(Debug, Default)]
pub struct VariablePool {
    scopes: RwLock<HashMap<String, NodeScope>>,
    conversation: RwLock<Option<Vec<HistoryTurn>>>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, NodeScope>> {
        self.scopes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, NodeScope>> {
        self.scopes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a single value under `node_id`
    pub fn set(&self, node_id: &str, key: &str, value: Value) {
        self.write()
            .entry(node_id.to_string())
            .or_default()
            .values
            .insert(key.to_string(), value);
    }

    /// Publish a node's whole output set at once
    pub fn publish(&self, node_id: &str, outputs: &Map<String, Value>) {
        let mut scopes = self.write();
        let scope = scopes.entry(node_id.to_string()).or_default();
        for (key, value) in outputs {
            scope.values.insert(key.clone(), value.clone());
        }
    }

    /// Register how a node's declared inputs are sourced
    pub fn bind_inputs(&self, node_id: &str, bindings: &[InputBinding]) {
        let mut scopes = self.write();
        let scope = scopes.entry(node_id.to_string()).or_default();
        for binding in bindings {
            scope
                .bindings
                .insert(binding.name.clone(), binding.source.clone());
        }
    }

    /// Look up `key` for `node_id`: published values first, then input bindings
    pub fn get(&self, node_id: &str, key: &str) -> Result<Value, PoolError> {
        let scopes = self.read();
        let mut current_node = node_id;
        let mut current_key = key;

        for _ in 0..MAX_BINDING_HOPS {
            let scope = scopes
                .get(current_node)
                .ok_or_else(|| PoolError::key_not_found(current_node, current_key))?;

            if let Some(value) = scope.values.get(current_key) {
                return Ok(value.clone());
            }

            match scope.bindings.get(current_key) {
                Some(InputSource::Literal(value)) => return Ok(value.clone()),
                Some(InputSource::Ref {
                    node_id: next_node,
                    name,
                }) => {
                    current_node = next_node.as_str();
                    current_key = name.as_str();
                }
                None => return Err(PoolError::key_not_found(current_node, current_key)),
            }
        }

        log::warn!(
            "Binding chain for {}.{} exceeded {} hops",
            node_id,
            key,
            MAX_BINDING_HOPS
        );
        Err(PoolError::key_not_found(node_id, key))
    }

    /// Resolve a path expression such as `A.b[1]` from `node_id`'s point of view
    pub fn resolve_path(&self, node_id: &str, expression: &str) -> Result<Value, PoolError> {
        let components = split_path(expression);
        let (root, rest) = components
            .split_first()
            .ok_or_else(|| PoolError::resolution(expression, "empty expression"))?;

        let root_value = self
            .get(node_id, root)
            .map_err(|e| PoolError::resolution(expression, e.to_string()))?;

        let mut current = &root_value;
        for component in rest {
            current = step(current, component)
                .ok_or_else(|| PoolError::resolution(expression, format!("no '{}'", component)))?;
        }

        Ok(current.clone())
    }

    /// Values published under `node_id`
    pub fn snapshot(&self, node_id: &str) -> Map<String, Value> {
        self.read()
            .get(node_id)
            .map(|scope| scope.values.clone())
            .unwrap_or_default()
    }

    /// Store the legacy chat history of a node
    pub fn set_node_history(&self, node_id: &str, history: Vec<HistoryTurn>) {
        self.write().entry(node_id.to_string()).or_default().history = history;
    }

    /// Legacy chat history of a node (empty when none was stored)
    pub fn node_history(&self, node_id: &str) -> Vec<HistoryTurn> {
        self.read()
            .get(node_id)
            .map(|scope| scope.history.clone())
            .unwrap_or_default()
    }

    /// Store the run-level conversation used by windowed history
    pub fn set_conversation(&self, turns: Vec<HistoryTurn>) {
        *self
            .conversation
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(turns);
    }

    pub fn conversation(&self) -> Option<Vec<HistoryTurn>> {
        self.conversation
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Split an expression on `.`, `[` and `]`, dropping empty pieces
pub fn split_path(expression: &str) -> Vec<&str> {
    expression
        .split(['.', '[', ']'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn step<'v>(value: &'v Value, component: &str) -> Option<&'v Value> {
    match value {
        Value::Object(obj) => obj.get(component),
        Value::Array(items) => items.get(component.parse::<usize>().ok()?),
        _ => None,
    }
}
