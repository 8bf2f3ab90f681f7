// SPDX-License-Identifier: MIT

//! Model module - the LLM chat capability used by LLM nodes
//!
//! This module provides the core [`ChatModel`] trait and shared types.
//! Implementations live in their own submodules:
//! - [openai] - OpenAI-compatible chat completions API
//! - [sse] - server-sent events parsing for streamed completions

pub mod openai;
pub mod sse;

use crate::adk::error::ModelError;
use crate::adk::trace::Span;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

/// Speaker of a history turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message of conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token counters reported by the provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Everything an LLM node sends to the provider
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model domain / name
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub history: Vec<HistoryTurn>,
    pub image_url: Option<String>,
    pub stream: bool,
    pub generation: GenerationConfig,
}

/// Provider answer: visible text plus optional reasoning trace
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatResponse {
    pub usage: TokenUsage,
    pub text: String,
    pub reasoning: String,
}

/// Core trait for LLM chat providers
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, request: &ChatRequest, span: &dyn Span)
        -> Result<ChatResponse, ModelError>;
}
