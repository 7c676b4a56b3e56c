//! Hosted generative reasoning strategy.

use super::normalize::RawClassification;
use crate::config::LlmConfig;
use crate::error::ReasoningError;
use crate::models::InferenceImage;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confidence assumed when the service does not state one
pub const DEFAULT_REASONING_CONFIDENCE: f32 = 0.85;

const PROMPT: &str = r#"You are sorting waste at a hospital disposal station.
Classify the single item held in the image into exactly one category:

- Recyclable: clean plastic bottles, metal cans, glass, paper, cardboard, clean containers
- General Biomedical: food waste, gauze, cotton, styrofoam, other non-recyclable items
- Infectious: items soiled with blood or body fluids, swabs, used gloves, dressings
- Sharp: needles, syringes, scalpels, blades, lancets, broken glass ampoules
- Pharmaceutical: pills, tablets, capsules, vials, medicine packaging with contents

Reply with JSON only:
{"category": "<category>", "item": "<item name>", "confidence": <0.0-1.0>, "explanation": "<one sentence>"}

If you cannot produce JSON, reply as "Category: Item Name. Explanation"."#;

/// Client for a reasoning service that classifies an image from a prompt
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn classify(&self, image: &InferenceImage) -> Result<RawClassification, ReasoningError>;

    /// Whether the service has what it needs to be called at all
    fn is_configured(&self) -> bool;

    fn service_name(&self) -> &str;
}

#[derive(Deserialize)]
struct ReasoningJson {
    category: String,
    #[serde(default, alias = "item_name", alias = "item_label")]
    item: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default, alias = "reason")]
    explanation: Option<String>,
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, then the closing fence
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_json_reply(text: &str) -> Option<RawClassification> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let reply: ReasoningJson = serde_json::from_str(&text[start..=end]).ok()?;
    if reply.category.trim().is_empty() {
        return None;
    }

    Some(RawClassification {
        item_label: reply.item.unwrap_or_default().trim().to_string(),
        explanation: reply.explanation.unwrap_or_default(),
        confidence: reply.confidence.unwrap_or(DEFAULT_REASONING_CONFIDENCE),
        category_text: reply.category,
    })
}

/// `"Category: Item Name. Explanation"`
fn parse_labelled_reply(text: &str) -> Option<RawClassification> {
    let (category, rest) = text.split_once(':')?;
    let category = category.trim().trim_matches(|c: char| c == '*' || c == '"').trim();
    if category.is_empty() || category.contains('\n') {
        return None;
    }

    let rest = rest.trim();
    let item = match rest.find('.') {
        Some(end) => &rest[..end],
        None => rest,
    };

    Some(RawClassification {
        category_text: category.to_string(),
        item_label: item.trim().trim_matches('"').to_string(),
        explanation: text.trim().to_string(),
        confidence: DEFAULT_REASONING_CONFIDENCE,
    })
}

/// Parse a reasoning reply, JSON first and the labelled line format second
pub fn parse_reasoning_text(text: &str) -> Result<RawClassification, ReasoningError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ReasoningError::MalformedResponse {
            details: "empty reply".to_string(),
        });
    }

    parse_json_reply(body)
        .or_else(|| parse_labelled_reply(body))
        .ok_or_else(|| ReasoningError::MalformedResponse {
            details: format!("unrecognized reply: {}", body.chars().take(120).collect::<String>()),
        })
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 2],
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Image { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

/// Gemini `generateContent` client trying each configured model in turn
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    models: Vec<String>,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ReasoningError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ReasoningError::Transport {
                details: e.to_string(),
            })?;

        if config.api_key.is_none() {
            warn!("No reasoning API key configured, LLM classifications will degrade to Unknown");
        }

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            models: config.models.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        image: &InferenceImage,
    ) -> Result<String, ReasoningError> {
        let request = GenerateRequest {
            contents: [Content {
                parts: [
                    Part::Text { text: PROMPT },
                    Part::Image {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: BASE64.encode(image.jpeg.as_slice()),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.endpoint, model))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ReasoningError::Transport {
                details: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| ReasoningError::MalformedResponse {
                    details: e.to_string(),
                })?;

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ReasoningError::MalformedResponse {
                details: "reply carried no text".to_string(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ReasoningService for GeminiClient {
    async fn classify(&self, image: &InferenceImage) -> Result<RawClassification, ReasoningError> {
        let api_key = self.api_key.as_deref().ok_or(ReasoningError::NotConfigured)?;

        let mut last_error = ReasoningError::NotConfigured;
        for model in &self.models {
            debug!("Requesting classification from {}", model);
            let attempt = match self.generate(api_key, model, image).await {
                Ok(text) => parse_reasoning_text(&text),
                Err(e) => Err(e),
            };

            match attempt {
                Ok(raw) => {
                    info!("Reasoning classification from {}: {}", model, raw.category_text);
                    return Ok(raw);
                }
                Err(e) => {
                    warn!("Reasoning model {} failed: {}", model, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() && !self.models.is_empty()
    }

    fn service_name(&self) -> &str {
        "gemini"
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Failure(String),
}

/// Scripted reasoning service
#[derive(Clone)]
pub struct MockReasoningService {
    reply: Arc<Mutex<MockReply>>,
    latency: Arc<Mutex<Duration>>,
    calls: Arc<AtomicUsize>,
}

impl MockReasoningService {
    /// Service whose every reply is `text`
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Arc::new(Mutex::new(MockReply::Text(text.to_string()))),
            latency: Arc::new(Mutex::new(Duration::ZERO)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_reply(&self, text: &str) {
        *self.reply.lock() = MockReply::Text(text.to_string());
    }

    /// Make every call fail with a transport error
    pub fn fail(&self, details: &str) {
        *self.reply.lock() = MockReply::Failure(details.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockReasoningService {
    fn default() -> Self {
        Self::replying(
            r#"{"category": "Recyclable", "item": "Plastic Bottle", "confidence": 0.92, "explanation": "Clean PET plastic."}"#,
        )
    }
}

#[async_trait]
impl ReasoningService for MockReasoningService {
    async fn classify(&self, _image: &InferenceImage) -> Result<RawClassification, ReasoningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let reply = self.reply.lock().clone();
        match reply {
            MockReply::Text(text) => parse_reasoning_text(&text),
            MockReply::Failure(details) => Err(ReasoningError::Transport { details }),
        }
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn service_name(&self) -> &str {
        "mock"
    }
}
