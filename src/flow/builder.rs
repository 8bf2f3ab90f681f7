// SPDX-License-Identifier: MIT

//! Node builder - turns definitions into executable nodes
//!
//! The builder owns the engine configuration and the provider handles. Nodes
//! receive the providers they need at construction time.

use super::loader::NodeLoader;
use super::node::{KnowledgeConfig, KnowledgeNode, LlmConfig, LlmNode, Node, NodeMeta, NodeType};
use super::types::{KnowledgeNodeParams, LlmNodeParams, NodeDefinition};
use crate::adk::config::EngineConfig;
use crate::adk::error::FlowError;
use crate::adk::knowledge::{HttpKnowledgeClient, KnowledgeSearch};
use crate::adk::model::openai::OpenAiChatModel;
use crate::adk::model::ChatModel;
use std::path::Path;
use std::sync::Arc;

/// Constructs [`Node`]s from [`NodeDefinition`]s
pub struct NodeBuilder {
    config: EngineConfig,
    chat: Option<Arc<dyn ChatModel>>,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
}

impl NodeBuilder {
    /// Builder without providers; attach them with the `with_*` methods
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            chat: None,
            knowledge: None,
        }
    }

    /// Builder with the HTTP providers described by `config`
    pub fn from_config(config: EngineConfig) -> Result<Self, FlowError> {
        let chat: Option<Arc<dyn ChatModel>> = match &config.chat {
            Some(chat) => Some(Arc::new(
                OpenAiChatModel::new(chat).map_err(|e| FlowError::config(e.to_string()))?,
            )),
            None => {
                log::warn!("OPENAI_API_KEY not set; LLM nodes cannot be built");
                None
            }
        };

        let knowledge: Option<Arc<dyn KnowledgeSearch>> =
            if config.knowledge.recall_url.is_empty() {
                log::warn!("KNOWLEDGE_RECALL_URL not set; knowledge nodes cannot be built");
                None
            } else {
                Some(Arc::new(
                    HttpKnowledgeClient::new(&config.knowledge)
                        .map_err(|e| FlowError::config(e.to_string()))?,
                ))
            };

        Ok(Self {
            config,
            chat,
            knowledge,
        })
    }

    pub fn with_chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat = Some(model);
        self
    }

    pub fn with_knowledge(mut self, search: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(search);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load and build a node from a YAML file
    pub fn build_file<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<(NodeDefinition, Arc<dyn Node>), FlowError> {
        let def = NodeLoader::new().load_node(path)?;
        let node = self.build(&def)?;
        Ok((def, node))
    }

    /// Build an executable node from a parsed definition
    pub fn build(&self, def: &NodeDefinition) -> Result<Arc<dyn Node>, FlowError> {
        let meta = NodeMeta::new(def.id.clone(), def.display_name(), def.node_type);
        log::info!("Building {} node '{}'", def.node_type, def.id);

        match def.node_type {
            NodeType::Llm => self.build_llm(def, meta),
            NodeType::Knowledge => self.build_knowledge(def, meta),
        }
    }

    fn build_llm(&self, def: &NodeDefinition, meta: NodeMeta) -> Result<Arc<dyn Node>, FlowError> {
        let params: LlmNodeParams = def.params()?;
        let model = self
            .chat
            .clone()
            .ok_or_else(|| FlowError::config("no chat model configured"))?;

        let image_input = self.config.is_image_model(&params.domain);
        let history = if image_input {
            log::debug!("'{}' is an image model, history disabled", params.domain);
            Default::default()
        } else {
            params.history_mode()
        };

        let config = LlmConfig {
            domain: params.domain.clone(),
            template: params.template.clone(),
            system_template: params.system_template.clone(),
            resp_format: params.resp_format,
            history,
            generation: params.generation(),
            stream: params.stream,
            image_input,
            input_keys: def.input_keys(),
            output_keys: def.output_keys(),
        };
        Ok(Arc::new(LlmNode::new(meta, config, model)))
    }

    fn build_knowledge(
        &self,
        def: &NodeDefinition,
        meta: NodeMeta,
    ) -> Result<Arc<dyn Node>, FlowError> {
        let params: KnowledgeNodeParams = def.params()?;
        let search = self
            .knowledge
            .clone()
            .ok_or_else(|| FlowError::config("no knowledge service configured"))?;

        if def.inputs.is_empty() {
            return Err(FlowError::definition(format!(
                "knowledge node '{}' needs a query input",
                def.id
            )));
        }

        let config = KnowledgeConfig {
            top_n: params.top_n.value()?,
            rag_type: params.rag_type,
            repo_ids: params.repo_id,
            doc_ids: params.doc_ids,
            threshold: params.score,
            flow_id: params.flow_id,
            input_keys: def.input_keys(),
            output_keys: def.output_keys(),
        };
        Ok(Arc::new(KnowledgeNode::new(meta, config, search)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::error::{KnowledgeError, ModelError};
    use crate::adk::knowledge::{KnowledgeQuery, KnowledgeResponse};
    use crate::adk::model::{ChatRequest, ChatResponse};
    use crate::adk::trace::Span;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopModel;

    #[async_trait]
    impl ChatModel for NoopModel {
        async fn invoke(
            &self,
            _request: &ChatRequest,
            _span: &dyn Span,
        ) -> Result<ChatResponse, ModelError> {
            Ok(ChatResponse::default())
        }
    }

    struct NoopSearch;

    #[async_trait]
    impl KnowledgeSearch for NoopSearch {
        async fn query(
            &self,
            _query: &KnowledgeQuery,
            _span: &dyn Span,
        ) -> Result<KnowledgeResponse, KnowledgeError> {
            Ok(KnowledgeResponse::from_body(Value::Null))
        }
    }

    fn llm_def(domain: &str) -> NodeDefinition {
        NodeLoader::parse_yaml(&format!(
            "id: llm\nnodeType: llm\noutputs: [output]\nnodeParam:\n  domain: {}\n  template: hi\n  enableChatHistory: true\n",
            domain
        ))
        .unwrap()
    }

    #[test]
    fn test_build_llm_node() {
        let builder = NodeBuilder::new(EngineConfig::default()).with_chat_model(Arc::new(NoopModel));
        let node = builder.build(&llm_def("generalv3.5")).unwrap();
        assert_eq!(node.id(), "llm");
        assert_eq!(node.node_type(), NodeType::Llm);
    }

    #[test]
    fn test_missing_provider_is_config_error() {
        let builder = NodeBuilder::new(EngineConfig::default());
        assert!(matches!(
            builder.build(&llm_def("generalv3.5")),
            Err(FlowError::Config(_))
        ));
    }

    #[test]
    fn test_knowledge_requires_query_input() {
        let builder = NodeBuilder::new(EngineConfig::default()).with_knowledge(Arc::new(NoopSearch));
        let def = NodeLoader::parse_yaml("id: kb\nnodeType: knowledge\noutputs: [results]\n").unwrap();
        assert!(matches!(builder.build(&def), Err(FlowError::Definition(_))));

        let def = NodeLoader::parse_yaml(
            "id: kb\nnodeType: knowledge\ninputs:\n  - name: q\n    value: {type: literal, content: x}\noutputs: [results]\n",
        )
        .unwrap();
        assert_eq!(builder.build(&def).unwrap().node_type(), NodeType::Knowledge);
    }

    #[test]
    fn test_from_config_without_env() {
        let builder = NodeBuilder::from_config(EngineConfig::default()).unwrap();
        assert!(builder.chat.is_none());
        assert!(builder.knowledge.is_none());
    }
}
