// SPDX-License-Identifier: MIT

use super::{call_provider, Execution, Node, NodeContext, NodeMeta};
use crate::adk::error::ExecutionError;
use crate::adk::knowledge::{KnowledgeQuery, KnowledgeSearch, RagType};
use crate::flow::template::stringify;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Immutable parameters of a [`KnowledgeNode`]
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeConfig {
    pub top_n: u32,
    pub rag_type: RagType,
    pub repo_ids: Vec<String>,
    pub doc_ids: Vec<String>,
    /// Minimum similarity score
    pub threshold: f64,
    /// Overrides the run's flow id when non-empty
    pub flow_id: String,
    pub input_keys: Vec<String>,
    pub output_keys: Vec<String>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            rag_type: RagType::default(),
            repo_ids: Vec::new(),
            doc_ids: Vec::new(),
            threshold: 0.1,
            flow_id: String::new(),
            input_keys: Vec::new(),
            output_keys: Vec::new(),
        }
    }
}

/// Node that recalls the top-N chunks for its first input
pub struct KnowledgeNode {
    meta: NodeMeta,
    config: KnowledgeConfig,
    search: Arc<dyn KnowledgeSearch>,
}

impl KnowledgeNode {
    pub fn new(meta: NodeMeta, config: KnowledgeConfig, search: Arc<dyn KnowledgeSearch>) -> Self {
        Self {
            meta,
            config,
            search,
        }
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }
}

#[async_trait]
impl Node for KnowledgeNode {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    async fn run(
        &self,
        ctx: &NodeContext<'_>,
        exec: &mut Execution,
    ) -> Result<Map<String, Value>, ExecutionError> {
        let query_key = self.config.input_keys.first().ok_or_else(|| {
            ExecutionError::unclassified_msg(format!(
                "knowledge node '{}' declares no query input",
                self.id()
            ))
        })?;
        let query = ctx
            .pool
            .get(self.id(), query_key)
            .map_err(ExecutionError::unclassified)?;
        exec.record_input(query_key.clone(), query.clone());

        let query = stringify(&query);
        exec.record_process_data("query", Value::String(query.clone()));

        let flow_id = if self.config.flow_id.is_empty() {
            ctx.flow_id
        } else {
            self.config.flow_id.as_str()
        };
        let request = KnowledgeQuery {
            query,
            repo_ids: self.config.repo_ids.clone(),
            top_n: self.config.top_n,
            threshold: self.config.threshold,
            doc_ids: self.config.doc_ids.clone(),
            rag_type: self.config.rag_type,
            flow_id: flow_id.to_string(),
        };

        log::info!(
            "Node '{}' recalling top {} from {} repo(s) via {}",
            self.id(),
            request.top_n,
            request.repo_ids.len(),
            request.rag_type.as_str()
        );
        let response = call_provider(
            ctx.cancel,
            self.search.query(&request, ctx.span),
            ExecutionError::knowledge,
        )
        .await?;
        exec.set_raw_output(response.raw);

        let results = response
            .body
            .get("results")
            .cloned()
            .ok_or_else(|| ExecutionError::KnowledgeRetrieval {
                message: "recall response has no 'results' field".to_string(),
                cause: None,
            })?;

        let mut outputs = Map::new();
        if let Some(key) = self.config.output_keys.first() {
            outputs.insert(key.clone(), results);
        }
        Ok(outputs)
    }
}
