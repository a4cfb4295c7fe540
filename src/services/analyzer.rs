use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::models::entry::AnalysisResult;

/// Why a visual assessment could not be produced. Callers absorb this and
/// fall back to [`AnalysisResult::fallback`].
#[derive(Debug, thiserror::Error)]
pub enum AnalysisUnavailable {
    #[error("analysis service is not configured")]
    NotConfigured,

    #[error("analysis request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("analysis service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("analysis service returned no candidates")]
    EmptyResponse,

    #[error("analysis response was malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait SkinAnalyzer: Send + Sync {
    /// Single attempt, no retry.
    async fn analyze(
        &self,
        image: Bytes,
        mime_type: &str,
    ) -> Result<AnalysisResult, AnalysisUnavailable>;
}

const ANALYSIS_PROMPT: &str = r#"You are a dermatology assistant analyzing a facial photo for acne tracking.
Count visible lesions and rate skin characteristics. Respond with JSON only:
- whiteheads, blackheads, papules, pustules, nodules_or_cysts: integer counts (0 or more)
- inflammation_level, oiliness_level, dryness_level, hyperpigmentation_level: integers 1-10
- scarring_visible: boolean
- overall_severity_score: integer 1-10 (1 = clear skin, 10 = severe)
- confidence_score: number between 0 and 1 describing how reliable this assessment is
If the face is not clearly visible, give your best estimate with a low confidence_score."#;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiSkinAnalyzer {
    api_key: String,
    model_name: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ContentResponse,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
struct PartResponse {
    #[serde(default)]
    text: String,
}

/// Model output before normalization. Numbers arrive as floats often enough
/// that we accept them and round.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    whiteheads: f64,
    blackheads: f64,
    papules: f64,
    pustules: f64,
    nodules_or_cysts: f64,
    inflammation_level: f64,
    oiliness_level: f64,
    dryness_level: f64,
    hyperpigmentation_level: f64,
    scarring_visible: bool,
    overall_severity_score: f64,
    confidence_score: f64,
}

fn response_schema() -> serde_json::Value {
    let integer = json!({ "type": "INTEGER" });
    json!({
        "type": "OBJECT",
        "properties": {
            "whiteheads": integer,
            "blackheads": integer,
            "papules": integer,
            "pustules": integer,
            "nodules_or_cysts": integer,
            "inflammation_level": integer,
            "oiliness_level": integer,
            "dryness_level": integer,
            "hyperpigmentation_level": integer,
            "scarring_visible": { "type": "BOOLEAN" },
            "overall_severity_score": integer,
            "confidence_score": { "type": "NUMBER" }
        },
        "required": [
            "whiteheads", "blackheads", "papules", "pustules", "nodules_or_cysts",
            "inflammation_level", "oiliness_level", "dryness_level",
            "hyperpigmentation_level", "scarring_visible", "overall_severity_score",
            "confidence_score"
        ]
    })
}

impl GeminiSkinAnalyzer {
    pub fn new(
        api_key: String,
        model_name: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            api_key,
            model_name,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            client,
        })
    }

    /// Point the client at another `generateContent` host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn call_gemini_api(&self, request: GeminiRequest) -> Result<String, AnalysisUnavailable> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model_name
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisUnavailable::Status { status, body });
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AnalysisUnavailable::Malformed(e.to_string()))?;

        gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or(AnalysisUnavailable::EmptyResponse)
    }
}

#[async_trait]
impl SkinAnalyzer for GeminiSkinAnalyzer {
    #[instrument(skip(self, image), fields(size = image.len()))]
    async fn analyze(
        &self,
        image: Bytes,
        mime_type: &str,
    ) -> Result<AnalysisResult, AnalysisUnavailable> {
        if self.api_key.is_empty() {
            return Err(AnalysisUnavailable::NotConfigured);
        }

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: ANALYSIS_PROMPT.to_string(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: mime_type.to_string(),
                            data: general_purpose::STANDARD.encode(&image),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: response_schema(),
            },
        };

        let text = self.call_gemini_api(request).await?;
        let analysis = parse_analysis(&text)?;

        tracing::info!(
            severity = analysis.overall_severity_score,
            confidence = analysis.confidence_score,
            "Skin analysis completed"
        );

        Ok(analysis)
    }
}

/// Parse the model's JSON text into a normalized result.
pub fn parse_analysis(text: &str) -> Result<AnalysisResult, AnalysisUnavailable> {
    let raw: RawAnalysis = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| AnalysisUnavailable::Malformed(e.to_string()))?;
    Ok(normalize(raw))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

fn count(value: f64) -> i32 {
    if value.is_finite() {
        value.round().max(0.0).min(i32::MAX as f64) as i32
    } else {
        0
    }
}

fn level(value: f64) -> i32 {
    if value.is_finite() {
        value.round().clamp(1.0, 10.0) as i32
    } else {
        1
    }
}

fn normalize(raw: RawAnalysis) -> AnalysisResult {
    AnalysisResult {
        whiteheads: count(raw.whiteheads),
        blackheads: count(raw.blackheads),
        papules: count(raw.papules),
        pustules: count(raw.pustules),
        nodules_or_cysts: count(raw.nodules_or_cysts),
        inflammation_level: level(raw.inflammation_level),
        oiliness_level: level(raw.oiliness_level),
        dryness_level: level(raw.dryness_level),
        hyperpigmentation_level: level(raw.hyperpigmentation_level),
        scarring_visible: raw.scarring_visible,
        overall_severity_score: level(raw.overall_severity_score),
        confidence_score: if raw.confidence_score.is_finite() {
            raw.confidence_score.clamp(0.0, 1.0)
        } else {
            0.0
        },
    }
}
