//! Wire types for the arena backend.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `type` value the backend puts on stream errors that need a fresh login.
pub const AUTH_ERROR_KIND: &str = "auth_error";

// -- GET /get_available_models ---------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

/// Older backends map a key straight to its display name; newer ones send an
/// object with pricing and a default-selection flag.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ModelEntry {
    Detailed(ModelDetails),
    Name(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelDetails {
    pub name: String,
    #[serde(default)]
    pub input_cost: Option<f64>,
    #[serde(default)]
    pub output_cost: Option<f64>,
    #[serde(default)]
    pub selected: Option<bool>,
}

/// A model as the client presents it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub key: String,
    pub name: String,
    /// USD per million input tokens.
    pub input_cost: Option<f64>,
    /// USD per million output tokens.
    pub output_cost: Option<f64>,
    /// Whether the model is part of the default selection.
    pub selected: bool,
}

impl ModelsResponse {
    pub fn into_models(self) -> Vec<ModelInfo> {
        self.models
            .into_iter()
            .map(|(key, entry)| match entry {
                ModelEntry::Name(name) => ModelInfo {
                    key,
                    name,
                    input_cost: None,
                    output_cost: None,
                    selected: true,
                },
                ModelEntry::Detailed(d) => ModelInfo {
                    key,
                    name: d.name,
                    input_cost: d.input_cost,
                    output_cost: d.output_cost,
                    selected: d.selected.unwrap_or(true),
                },
            })
            .collect()
    }
}

// -- Stream / retry payloads -------------------------------------------------

/// One successful translation, as sent on the stream and by the retry endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub model: String,
    /// Backend id of the stored translation; needed to vote on it.
    pub id: i64,
    /// Shared id of the source query; one per session.
    pub query_id: i64,
    pub translation: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl StreamFailure {
    pub fn is_auth(&self) -> bool {
        self.kind.as_deref() == Some(AUTH_ERROR_KIND)
    }
}

/// Body of an unnamed stream event or of a retry response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Failure(StreamFailure),
    Success(TranslationResult),
}

#[derive(Debug, Serialize)]
pub struct RetryRequest<'a> {
    pub query: &'a str,
    pub model: &'a str,
}

// -- POST /vote ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub translation_id: i64,
    pub rating: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoteRequest {
    pub query_id: i64,
    pub votes: Vec<Vote>,
}

#[derive(Debug, Deserialize)]
pub struct VoteResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl VoteResponse {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}
