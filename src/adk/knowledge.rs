// SPDX-License-Identifier: MIT

//! Knowledge retrieval capability used by knowledge nodes

use crate::adk::config::KnowledgeClientConfig;
use crate::adk::error::KnowledgeError;
use crate::adk::trace::Span;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Retrieval strategy of the recall service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum RagType {
    #[default]
    #[serde(rename = "AIUI-RAG2")]
    AiuiRag2,
    #[serde(rename = "CBG-RAG")]
    CbgRag,
    #[serde(rename = "Ragflow-RAG")]
    RagflowRag,
    #[serde(rename = "SparkDesk-RAG")]
    SparkDeskRag,
}

impl RagType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiuiRag2 => "AIUI-RAG2",
            Self::CbgRag => "CBG-RAG",
            Self::RagflowRag => "Ragflow-RAG",
            Self::SparkDeskRag => "SparkDesk-RAG",
        }
    }
}

/// A single top-N recall request
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeQuery {
    pub query: String,
    pub repo_ids: Vec<String>,
    pub top_n: u32,
    pub threshold: f64,
    pub doc_ids: Vec<String>,
    pub rag_type: RagType,
    pub flow_id: String,
}

/// Reply of a recall provider
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeResponse {
    /// Response text exactly as the provider sent it
    pub raw: String,
    /// Decoded payload; recalled chunks are under `results`
    pub body: Value,
}

impl KnowledgeResponse {
    /// Response whose raw text is the serialized body
    pub fn from_body(body: Value) -> Self {
        Self {
            raw: body.to_string(),
            body,
        }
    }
}

/// Core trait for knowledge recall providers
#[async_trait]
pub trait KnowledgeSearch: Send + Sync {
    async fn query(
        &self,
        query: &KnowledgeQuery,
        span: &dyn Span,
    ) -> Result<KnowledgeResponse, KnowledgeError>;
}

/// Recall client posting JSON to a configured endpoint
pub struct HttpKnowledgeClient {
    client: Client,
    recall_url: String,
}

impl HttpKnowledgeClient {
    pub fn new(config: &KnowledgeClientConfig) -> Result<Self, KnowledgeError> {
        if config.recall_url.is_empty() {
            return Err(KnowledgeError::MissingEndpoint);
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            recall_url: config.recall_url.clone(),
        })
    }

    fn build_body(query: &KnowledgeQuery) -> Value {
        json!({
            "query": query.query,
            "topN": query.top_n.to_string(),
            "ragType": query.rag_type.as_str(),
            "match": {
                "repoId": query.repo_ids,
                "docIds": query.doc_ids,
                "threshold": query.threshold,
                "flowId": query.flow_id
            }
        })
    }

    /// Decode a successful response body, keeping the text it came from
    fn decode(text: String) -> Result<KnowledgeResponse, KnowledgeError> {
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| KnowledgeError::InvalidResponse(e.to_string()))?;

        if let Some(code) = value.get("code").and_then(Value::as_i64) {
            if code != 0 {
                let message = value["message"].as_str().unwrap_or("unknown error");
                return Err(KnowledgeError::InvalidResponse(format!(
                    "code {}: {}",
                    code, message
                )));
            }
        }

        // some deployments wrap the payload in `data`
        let body = match value.get("data") {
            Some(data) if data.get("results").is_some() => data.clone(),
            _ => value,
        };
        Ok(KnowledgeResponse { raw: text, body })
    }
}

#[async_trait]
impl KnowledgeSearch for HttpKnowledgeClient {
    async fn query(
        &self,
        query: &KnowledgeQuery,
        span: &dyn Span,
    ) -> Result<KnowledgeResponse, KnowledgeError> {
        let body = Self::build_body(query);
        log::debug!("Knowledge recall request: {}", body);

        let resp = self
            .client
            .post(&self.recall_url)
            .header("Accept", "application/json")
            .header("X-Trace-Id", span.trace_id())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(KnowledgeError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        Self::decode(resp.text().await?)
    }
}
