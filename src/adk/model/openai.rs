// SPDX-License-Identifier: MIT

//! OpenAI-compatible chat completions client

use super::sse::SseParser;
use super::{ChatModel, ChatRequest, ChatResponse, HistoryTurn, Role, TokenUsage};
use crate::adk::config::ChatProviderConfig;
use crate::adk::error::ModelError;
use crate::adk::trace::Span;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};

/// Chat model speaking the `/chat/completions` protocol
pub struct OpenAiChatModel {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiChatModel {
    /// Create a client from explicit provider settings
    pub fn new(config: &ChatProviderConfig) -> Result<Self, ModelError> {
        if config.api_key.is_empty() {
            return Err(ModelError::ApiKeyMissing("openai".to_string()));
        }
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn turn_to_message(turn: &HistoryTurn) -> Value {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        json!({ "role": role, "content": turn.content })
    }

    /// Build the request body in OpenAI message format
    fn build_body(request: &ChatRequest) -> Value {
        let mut messages = Vec::with_capacity(request.history.len() + 2);

        if let Some(system) = request.system_prompt.as_deref() {
            if !system.is_empty() {
                messages.push(json!({ "role": "system", "content": system }));
            }
        }

        messages.extend(request.history.iter().map(Self::turn_to_message));

        match request.image_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => messages.push(json!({
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": url } },
                    { "type": "text", "text": request.prompt }
                ]
            })),
            None => messages.push(json!({ "role": "user", "content": request.prompt })),
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": request.stream
        });

        if request.stream {
            body["stream_options"] = json!({ "include_usage": true });
        }

        let cfg = &request.generation;
        if let Some(temp) = cfg.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = cfg.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = cfg.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(top_k) = cfg.top_k {
            body["top_k"] = json!(top_k);
        }

        body
    }

    fn parse_usage(usage: &Value) -> TokenUsage {
        TokenUsage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        }
    }

    /// Parse a non-streamed completion
    fn parse_response(response: &Value) -> Result<ChatResponse, ModelError> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".to_string()))?;

        let message = &choice["message"];
        Ok(ChatResponse {
            usage: Self::parse_usage(&response["usage"]),
            text: message["content"].as_str().unwrap_or_default().to_string(),
            reasoning: message["reasoning_content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Fold one streamed chunk into the accumulated response
    fn apply_chunk(acc: &mut ChatResponse, chunk: &Value) {
        if let Some(delta) = chunk["choices"]
            .as_array()
            .and_then(|c| c.first())
            .map(|c| &c["delta"])
        {
            if let Some(text) = delta["content"].as_str() {
                acc.text.push_str(text);
            }
            if let Some(reasoning) = delta["reasoning_content"].as_str() {
                acc.reasoning.push_str(reasoning);
            }
        }
        if chunk["usage"].is_object() {
            acc.usage = Self::parse_usage(&chunk["usage"]);
        }
    }

    fn apply_event(acc: &mut ChatResponse, data: &str) -> Result<bool, ModelError> {
        if data.trim() == "[DONE]" {
            return Ok(true);
        }
        let chunk: Value = serde_json::from_str(data)
            .map_err(|e| ModelError::InvalidResponse(format!("bad stream chunk: {}", e)))?;
        if let Some(err) = chunk.get("error") {
            return Err(ModelError::InvalidResponse(err.to_string()));
        }
        Self::apply_chunk(acc, &chunk);
        Ok(false)
    }

    async fn collect_stream(resp: reqwest::Response) -> Result<ChatResponse, ModelError> {
        let mut parser = SseParser::new();
        let mut acc = ChatResponse::default();
        let mut bytes = resp.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            pending.extend_from_slice(&chunk?);
            let text = take_utf8(&mut pending);
            for data in parser.feed(&text) {
                if Self::apply_event(&mut acc, &data)? {
                    return Ok(acc);
                }
            }
        }
        if let Some(data) = parser.finish() {
            Self::apply_event(&mut acc, &data)?;
        }

        Ok(acc)
    }
}

/// Drain the longest valid UTF-8 prefix of `pending`; a multi-byte character
/// split across network chunks stays buffered
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
    pending.drain(..valid);
    text
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn invoke(
        &self,
        request: &ChatRequest,
        span: &dyn Span,
    ) -> Result<ChatResponse, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(request);

        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("X-Trace-Id", span.trace_id())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await?;
            return Err(ModelError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response = if request.stream {
            Self::collect_stream(resp).await?
        } else {
            let resp_json: Value = resp.json().await?;
            Self::parse_response(&resp_json)?
        };

        log::info!(
            "OpenAI response: {} chars, {} reasoning chars, {} total tokens",
            response.text.len(),
            response.reasoning.len(),
            response.usage.total_tokens
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::model::GenerationConfig;
    use std::time::Duration;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4o-mini".to_string(),
            prompt: "What now?".to_string(),
            system_prompt: Some("Be brief".to_string()),
            history: vec![HistoryTurn::user("hi"), HistoryTurn::assistant("hello")],
            image_url: None,
            stream: false,
            generation: GenerationConfig {
                max_output_tokens: Some(256),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_new_requires_api_key() {
        let config = ChatProviderConfig {
            api_key: String::new(),
            base_url: "http://localhost".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            OpenAiChatModel::new(&config),
            Err(ModelError::ApiKeyMissing(_))
        ));
    }

    #[test]
    fn test_build_body_orders_messages() {
        let body = OpenAiChatModel::build_body(&request());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "What now?");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("temperature").is_none());
        assert!(body.get("stream_options").is_none());
    }

    #[test]
    fn test_build_body_with_image() {
        let mut req = request();
        req.image_url = Some("http://img/1.png".to_string());
        let body = OpenAiChatModel::build_body(&req);
        let last = body["messages"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(last["content"][0]["image_url"]["url"], "http://img/1.png");
        assert_eq!(last["content"][1]["text"], "What now?");
    }

    #[test]
    fn test_parse_response_with_reasoning() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "42",
                    "reasoning_content": "thinking..."
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        });
        let parsed = OpenAiChatModel::parse_response(&response).unwrap();
        assert_eq!(parsed.text, "42");
        assert_eq!(parsed.reasoning, "thinking...");
        assert_eq!(parsed.usage.total_tokens, 12);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let err = OpenAiChatModel::parse_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[test]
    fn test_apply_stream_events() {
        let mut acc = ChatResponse::default();
        let events = [
            r#"{"choices":[{"delta":{"reasoning_content":"hmm "}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"}}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        ];
        for data in events {
            assert!(!OpenAiChatModel::apply_event(&mut acc, data).unwrap());
        }
        assert!(OpenAiChatModel::apply_event(&mut acc, "[DONE]").unwrap());
        assert_eq!(acc.text, "Hello");
        assert_eq!(acc.reasoning, "hmm ");
        assert_eq!(acc.usage.total_tokens, 5);
    }

    #[test]
    fn test_take_utf8_keeps_split_character() {
        let bytes = "héllo".as_bytes();
        let mut pending = bytes[..2].to_vec();
        assert_eq!(take_utf8(&mut pending), "h");
        assert_eq!(pending.len(), 1);

        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8(&mut pending), "éllo");
        assert!(pending.is_empty());
    }

    #[test]
    fn test_stream_error_chunk() {
        let mut acc = ChatResponse::default();
        let err = OpenAiChatModel::apply_event(&mut acc, r#"{"error":{"message":"quota"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("quota"));
    }
}
