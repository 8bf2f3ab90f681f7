// SPDX-License-Identifier: MIT

//! YAML schema types for node definitions
//!
//! Field names follow the camelCase node DSL (`nodeParam`, `topN`,
//! `enableChatHistoryV2`, ...). The per-type parameter block is kept as a raw
//! mapping and decoded once the node type is known.

use super::history::HistoryMode;
use super::node::NodeType;
use super::pool::InputBinding;
use super::response::RespFormat;
use crate::adk::error::FlowError;
use crate::adk::knowledge::RagType;
use crate::adk::model::GenerationConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// History token budget when a node does not set `maxTokens`
pub const DEFAULT_HISTORY_MAX_TOKENS: u32 = 2048;

/// A single node as written in a definition file
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,
    #[serde(default)]
    pub alias_name: String,
    pub node_type: NodeType,
    #[serde(default)]
    pub inputs: Vec<InputBinding>,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
    #[serde(default)]
    pub node_param: serde_yaml::Mapping,
}

impl NodeDefinition {
    pub fn input_keys(&self) -> Vec<String> {
        self.inputs.iter().map(|b| b.name.clone()).collect()
    }

    pub fn output_keys(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name().to_string()).collect()
    }

    /// Alias name, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.alias_name.is_empty() {
            &self.id
        } else {
            &self.alias_name
        }
    }

    /// Decode `nodeParam` into the parameter type of this node
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, FlowError> {
        serde_yaml::from_value(serde_yaml::Value::Mapping(self.node_param.clone())).map_err(|e| {
            FlowError::definition(format!("invalid nodeParam of '{}': {}", self.id, e))
        })
    }
}

/// Declared output: a bare name or an object with a name and optional schema
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum OutputDef {
    Name(String),
    Declared {
        name: String,
        #[serde(default)]
        schema: Option<serde_json::Value>,
    },
}

impl OutputDef {
    pub fn name(&self) -> &str {
        match self {
            OutputDef::Name(name) => name,
            OutputDef::Declared { name, .. } => name,
        }
    }
}

/// `enableChatHistoryV2` block
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryV2 {
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default = "default_rounds")]
    pub rounds: usize,
}

impl Default for ChatHistoryV2 {
    fn default() -> Self {
        Self {
            is_enabled: false,
            rounds: default_rounds(),
        }
    }
}

fn default_rounds() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// `nodeParam` of an LLM node
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmNodeParams {
    pub domain: String,
    pub template: String,
    #[serde(default)]
    pub system_template: Option<String>,
    #[serde(default)]
    pub resp_format: RespFormat,
    #[serde(default)]
    pub enable_chat_history: bool,
    #[serde(default)]
    pub enable_chat_history_v2: ChatHistoryV2,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default = "default_true")]
    pub stream: bool,
}

impl LlmNodeParams {
    /// Collapse the two history toggles into one mode; windowed wins
    pub fn history_mode(&self) -> HistoryMode {
        let v2 = self.enable_chat_history_v2;
        match (self.enable_chat_history, v2.is_enabled) {
            (legacy, true) => {
                if legacy {
                    log::warn!("Both chat history toggles are set; using windowed history");
                }
                HistoryMode::Windowed {
                    rounds: v2.rounds,
                    max_tokens: self.max_tokens.unwrap_or(DEFAULT_HISTORY_MAX_TOKENS) as usize,
                }
            }
            (true, false) => HistoryMode::Legacy,
            (false, false) => HistoryMode::Disabled,
        }
    }

    pub fn generation(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.temperature,
            max_output_tokens: self.max_tokens,
            top_p: None,
            top_k: self.top_k,
        }
    }
}

/// Integer field the DSL may write as a string (`topN: "5"`)
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Count {
    Number(u32),
    Text(String),
}

impl Count {
    pub fn value(&self) -> Result<u32, FlowError> {
        match self {
            Count::Number(n) => Ok(*n),
            Count::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| FlowError::definition(format!("'{}' is not a count", s))),
        }
    }
}

fn default_top_n() -> Count {
    Count::Text("5".to_string())
}

fn default_score() -> f64 {
    0.1
}

/// `nodeParam` of a knowledge node
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeNodeParams {
    #[serde(default = "default_top_n", rename = "topN")]
    pub top_n: Count,
    #[serde(default)]
    pub rag_type: RagType,
    #[serde(default)]
    pub repo_id: Vec<String>,
    #[serde(default)]
    pub doc_ids: Vec<String>,
    #[serde(default = "default_score")]
    pub score: f64,
    #[serde(default)]
    pub flow_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_params(yaml: &str) -> LlmNodeParams {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_history_toggles() {
        let base = "domain: d\ntemplate: t\n";
        assert_eq!(llm_params(base).history_mode(), HistoryMode::Disabled);

        let legacy = llm_params(&format!("{}enableChatHistory: true\n", base));
        assert_eq!(legacy.history_mode(), HistoryMode::Legacy);

        let both = llm_params(&format!(
            "{}enableChatHistory: true\nmaxTokens: 300\nenableChatHistoryV2:\n  isEnabled: true\n  rounds: 4\n",
            base
        ));
        assert_eq!(
            both.history_mode(),
            HistoryMode::Windowed {
                rounds: 4,
                max_tokens: 300
            }
        );

        let v2_default_budget = llm_params(&format!(
            "{}enableChatHistoryV2:\n  isEnabled: true\n",
            base
        ));
        assert_eq!(
            v2_default_budget.history_mode(),
            HistoryMode::Windowed {
                rounds: 1,
                max_tokens: DEFAULT_HISTORY_MAX_TOKENS as usize
            }
        );
    }

    #[test]
    fn test_llm_params_defaults() {
        let params = llm_params("domain: d\ntemplate: t\nrespFormat: 2\ntopK: 4");
        assert_eq!(params.resp_format, RespFormat::Json);
        assert!(params.stream);
        assert_eq!(params.generation().top_k, Some(4));
        assert!(params.system_template.is_none());
    }

    #[test]
    fn test_knowledge_params_defaults() {
        let params: KnowledgeNodeParams = serde_yaml::from_str("repoId: [r1]").unwrap();
        assert_eq!(params.top_n.value().unwrap(), 5);
        assert_eq!(params.rag_type, RagType::AiuiRag2);
        assert_eq!(params.score, 0.1);
        assert!(params.doc_ids.is_empty());
    }

    #[test]
    fn test_top_n_number_or_string() {
        let numeric: KnowledgeNodeParams = serde_yaml::from_str("topN: 8").unwrap();
        assert_eq!(numeric.top_n.value().unwrap(), 8);
        let text: KnowledgeNodeParams = serde_yaml::from_str("topN: \"3\"").unwrap();
        assert_eq!(text.top_n.value().unwrap(), 3);
        let bad: KnowledgeNodeParams = serde_yaml::from_str("topN: many").unwrap();
        assert!(bad.top_n.value().is_err());
    }

    #[test]
    fn test_output_defs() {
        let outputs: Vec<OutputDef> =
            serde_yaml::from_str("- output\n- name: REASONING_CONTENT\n  schema: {type: string}")
                .unwrap();
        let names: Vec<&str> = outputs.iter().map(OutputDef::name).collect();
        assert_eq!(names, vec!["output", "REASONING_CONTENT"]);
    }
}
