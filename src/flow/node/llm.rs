// SPDX-License-Identifier: MIT

use super::{call_provider, gather_inputs, Execution, Node, NodeContext, NodeMeta};
use crate::adk::error::ExecutionError;
use crate::adk::model::{ChatModel, ChatRequest, GenerationConfig, HistoryTurn};
use crate::flow::history::{window, HistoryMode};
use crate::flow::response::{self, RespFormat};
use crate::flow::template::{render, stringify};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Input carrying the image reference of image-understanding models
pub const SYSTEM_IMAGE: &str = "SYSTEM_IMAGE";

/// Immutable parameters of an [`LlmNode`]
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Model domain sent to the provider
    pub domain: String,
    pub template: String,
    pub system_template: Option<String>,
    pub resp_format: RespFormat,
    pub history: HistoryMode,
    pub generation: GenerationConfig,
    pub stream: bool,
    /// Send the `SYSTEM_IMAGE` input as an image reference
    pub image_input: bool,
    pub input_keys: Vec<String>,
    pub output_keys: Vec<String>,
}

/// Node that renders a prompt and asks a chat model
pub struct LlmNode {
    meta: NodeMeta,
    config: LlmConfig,
    model: Arc<dyn ChatModel>,
}

impl LlmNode {
    pub fn new(meta: NodeMeta, config: LlmConfig, model: Arc<dyn ChatModel>) -> Self {
        Self {
            meta,
            config,
            model,
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn history(&self, ctx: &NodeContext<'_>) -> Vec<HistoryTurn> {
        match self.config.history {
            HistoryMode::Disabled => Vec::new(),
            HistoryMode::Legacy => ctx.pool.node_history(self.id()),
            HistoryMode::Windowed { rounds, max_tokens } => ctx
                .pool
                .conversation()
                .map(|turns| window(&turns, max_tokens, rounds))
                .unwrap_or_default(),
        }
    }

    fn render(&self, ctx: &NodeContext<'_>, template: &str) -> String {
        render(template, &self.config.input_keys, self.id(), ctx.pool)
    }
}

#[async_trait]
impl Node for LlmNode {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    async fn run(
        &self,
        ctx: &NodeContext<'_>,
        exec: &mut Execution,
    ) -> Result<Map<String, Value>, ExecutionError> {
        gather_inputs(ctx, self.id(), &self.config.input_keys, exec)?;

        let prompt = self.render(ctx, &self.config.template);
        let system_prompt = self
            .config
            .system_template
            .as_deref()
            .map(|t| self.render(ctx, t));

        let image_url = if self.config.image_input {
            exec.inputs()
                .get(SYSTEM_IMAGE)
                .map(stringify)
                .filter(|url| !url.is_empty())
        } else {
            None
        };

        let history = self.history(ctx);
        if !history.is_empty() {
            let turns = serde_json::to_value(&history).map_err(ExecutionError::unclassified)?;
            exec.record_input("chatHistory", turns);
        }
        exec.record_process_data("query", Value::String(prompt.clone()));

        let request = ChatRequest {
            model: self.config.domain.clone(),
            prompt,
            system_prompt,
            history,
            image_url,
            stream: self.config.stream,
            generation: self.config.generation.clone(),
        };

        log::info!(
            "Node '{}' calling model '{}' ({} history turns)",
            self.id(),
            request.model,
            request.history.len()
        );
        let response = call_provider(
            ctx.cancel,
            self.model.invoke(&request, ctx.span),
            ExecutionError::llm,
        )
        .await?;

        exec.set_raw_output(response.text.clone());
        exec.set_token_usage(response.usage);

        let parsed = response::parse(
            self.config.resp_format,
            &response.text,
            &response.reasoning,
            &self.config.output_keys,
        );
        response::assemble_outputs(
            self.config.resp_format,
            &parsed,
            &self.config.output_keys,
            self.id(),
            ctx.pool,
        )
        .map_err(ExecutionError::parse)
    }
}
