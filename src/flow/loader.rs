// SPDX-License-Identifier: MIT

//! Node loader - YAML definition files and JSON pool seeds
//!
//! This module handles loading node definitions from YAML files and seeding a
//! [`VariablePool`] from a JSON document shaped `{ "<node_id>": { "<key>": value } }`.

use super::pool::VariablePool;
use super::types::NodeDefinition;
use crate::adk::error::FlowError;
use crate::adk::model::HistoryTurn;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Seed key holding the run-level conversation instead of a node scope
pub const CONVERSATION_KEY: &str = "$conversation";

/// Seed key holding per-node legacy histories, `{ "<node_id>": [turns] }`
pub const NODE_HISTORY_KEY: &str = "$history";

/// Loads node definitions from YAML files
pub struct NodeLoader;

impl NodeLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a node definition from a YAML file
    pub fn load_node<P: AsRef<Path>>(&self, path: P) -> Result<NodeDefinition, FlowError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a node definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<NodeDefinition, FlowError> {
        let def: NodeDefinition = serde_yaml::from_str(content)?;
        if def.id.trim().is_empty() {
            return Err(FlowError::definition("node id must not be empty"));
        }
        Ok(def)
    }

    /// Load a pool seed document from a JSON file
    pub fn load_seed<P: AsRef<Path>>(&self, path: P) -> Result<Value, FlowError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl Default for NodeLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish every value of `seed` into `pool`
///
/// `$conversation`, when present, is an array of history turns stored as the
/// run conversation. `$history` maps node ids to their legacy chat history.
pub fn seed_pool(pool: &VariablePool, seed: &Value) -> Result<(), FlowError> {
    let scopes = seed
        .as_object()
        .ok_or_else(|| FlowError::definition("pool seed must be a JSON object"))?;

    for (node_id, values) in scopes {
        if node_id == CONVERSATION_KEY {
            let turns: Vec<HistoryTurn> = serde_json::from_value(values.clone())?;
            pool.set_conversation(turns);
            continue;
        }
        if node_id == NODE_HISTORY_KEY {
            let histories: HashMap<String, Vec<HistoryTurn>> =
                serde_json::from_value(values.clone())?;
            for (owner, turns) in histories {
                pool.set_node_history(&owner, turns);
            }
            continue;
        }
        let values = values.as_object().ok_or_else(|| {
            FlowError::definition(format!("pool seed for '{}' must be an object", node_id))
        })?;
        pool.publish(node_id, values);
    }

    log::debug!("Seeded pool with {} scope(s)", scopes.len());
    Ok(())
}
