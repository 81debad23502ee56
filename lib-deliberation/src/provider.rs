//! Generative capability behind the agent council.
//!
//! Agents are polymorphic over a single text-in/text-out method. The mock
//! implementation is first-class: it is the default when no external
//! provider is configured and every deterministic test drives it.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Provider failure modes; all locally recoverable by the engine (the
/// affected agent simply returns no vote).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider at capacity")]
    Capacity,

    #[error("provider rate limited")]
    RateLimited,

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// A blocking, cancellable text-generation capability.
#[async_trait]
pub trait GenerativeCapability: Send + Sync {
    async fn generate(&self, prompt: &str, system_role: &str) -> Result<String, ProviderError>;
}

// ---------------------------------------------------------------------------
// Mock provider
// ---------------------------------------------------------------------------

enum MockReply {
    Text(String),
    Fail(ProviderError),
}

/// Deterministic offline provider.
///
/// Replies are scripted per role (matched case-insensitively against the
/// system role text). Each call consumes the next scripted reply; the last
/// one repeats once the queue drains. Unscripted roles get a neutral
/// abstain.
#[derive(Default)]
pub struct MockProvider {
    scripts: Mutex<HashMap<String, VecDeque<MockReply>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a structured evaluation reply for a role.
    pub fn script_vote(
        &self,
        role: &str,
        vote: &str,
        ulfr: (f64, f64, f64, f64),
        confidence: f64,
    ) -> &Self {
        let body = serde_json::json!({
            "vote": vote.to_uppercase(),
            "ulfr": {"U": ulfr.0, "L": ulfr.1, "F_penalty": ulfr.2, "R_risk": ulfr.3},
            "confidence": confidence,
            "reasoning": format!("scripted {role} evaluation"),
            "concerns": [],
            "recommendations": [],
        });
        self.script_text(role, body.to_string())
    }

    /// Script a raw text reply for a role.
    pub fn script_text(&self, role: &str, text: impl Into<String>) -> &Self {
        self.scripts
            .lock()
            .entry(role.to_lowercase())
            .or_default()
            .push_back(MockReply::Text(text.into()));
        self
    }

    /// Script a failure for a role.
    pub fn script_failure(&self, role: &str, error: ProviderError) -> &Self {
        self.scripts
            .lock()
            .entry(role.to_lowercase())
            .or_default()
            .push_back(MockReply::Fail(error));
        self
    }

    fn neutral_reply() -> String {
        serde_json::json!({
            "vote": "ABSTAIN",
            "ulfr": {"U": 0.5, "L": 0.5, "F_penalty": 0.5, "R_risk": 0.5},
            "confidence": 0.5,
            "reasoning": "no scripted position for this role",
        })
        .to_string()
    }
}

#[async_trait]
impl GenerativeCapability for MockProvider {
    async fn generate(&self, _prompt: &str, system_role: &str) -> Result<String, ProviderError> {
        let role_text = system_role.to_lowercase();
        let mut scripts = self.scripts.lock();
        let matched = scripts
            .iter_mut()
            .find(|(role, _)| role_text.contains(role.as_str()));
        let Some((role, queue)) = matched else {
            return Ok(Self::neutral_reply());
        };
        debug!(role = %role, "mock provider reply");
        match queue.len() {
            0 => Ok(Self::neutral_reply()),
            1 => match queue.front().expect("non-empty") {
                // keep replaying the final scripted reply
                MockReply::Text(text) => Ok(text.clone()),
                MockReply::Fail(error) => Err(error.clone()),
            },
            _ => match queue.pop_front().expect("non-empty") {
                MockReply::Text(text) => Ok(text),
                MockReply::Fail(error) => Err(error),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// External HTTP provider
// ---------------------------------------------------------------------------

/// Request body for the external provider's `/api/generate` endpoint.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Non-streaming response from `/api/generate`.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Minimal client for an Ollama-compatible generation API.
pub struct HttpProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(55))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl GenerativeCapability for HttpProvider {
    async fn generate(&self, prompt: &str, system_role: &str) -> Result<String, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let mut request = self.client.post(&url).json(&GenerateRequest {
            model: &self.model,
            prompt,
            system: system_role,
            stream: false,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let body: GenerateResponse = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
                Ok(body.response)
            }
            429 => Err(ProviderError::RateLimited),
            503 | 529 => Err(ProviderError::Capacity),
            status => Err(ProviderError::Unavailable(format!("HTTP {status}"))),
        }
    }
}
