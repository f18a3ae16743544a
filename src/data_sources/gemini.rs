//! Google Gemini `generateContent` client.
//!
//! Only the slice of the REST API FaunaSphere needs is modelled: text and
//! inline-image parts, the search grounding tool, structured JSON output and
//! image generation hints.
//!
//! # API Reference
//!
//! See: <https://ai.google.dev/api/generate-content>

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::credentials::KeyRing;
use crate::error::GeminiError;

/// Base URL for the Gemini REST API.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Anything that can answer a `generateContent` call.
///
/// [`GeminiClient`] talks to the real service; tests script their own.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError>;
}

/// HTTP client for the Gemini API.
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    keys: KeyRing,
}

impl GeminiClient {
    /// Create a new client against the public endpoint.
    pub fn new(keys: KeyRing) -> Self {
        Self::with_base_url(GEMINI_API_BASE, keys)
    }

    /// Create a client with a custom base URL (for testing or proxies).
    pub fn with_base_url(base_url: &str, keys: KeyRing) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
        }
    }

    /// Create a client with a custom base URL and request timeout.
    pub fn with_timeout(
        base_url: &str,
        keys: KeyRing,
        timeout: Duration,
    ) -> Result<Self, GeminiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(model)
        )
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let api_key = self
            .keys
            .current()
            .await
            .ok_or(GeminiError::MissingCredential)?;
        let url = self.endpoint(model);

        debug!(%url, model, "Sending generateContent request");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeminiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data = response.json::<GenerateContentResponse>().await?;
        debug!(model, candidates = data.candidates.len(), "generateContent answered");
        Ok(data)
    }
}

// ============================================================================
// Request types
// ============================================================================

/// Body of a `generateContent` call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    /// A single-turn request carrying one text prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }],
            ..Self::default()
        }
    }

    /// Enable Google Search grounding.
    pub fn with_google_search(mut self) -> Self {
        self.tools.push(Tool::google_search());
        self
    }

    /// Set the generation config.
    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = Some(config);
        self
    }

    /// The concatenated prompt text, for logs and tests.
    pub fn prompt_text(&self) -> String {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A turn of conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One piece of a turn: text or an inline binary payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

/// Base64-encoded binary payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,

    #[serde(default)]
    pub data: String,
}

impl InlineData {
    /// Wrap the payload as a `data:` URI (PNG when the MIME type is missing).
    pub fn to_data_uri(&self) -> String {
        let mime = if self.mime_type.is_empty() {
            "image/png"
        } else {
            &self.mime_type
        };
        format!("data:{};base64,{}", mime, self.data)
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_search: Option<GoogleSearch>,
}

impl Tool {
    pub fn google_search() -> Self {
        Self {
            google_search: Some(GoogleSearch {}),
        }
    }
}

/// Google Search grounding; takes no options.
#[derive(Debug, Clone, Serialize)]
pub struct GoogleSearch {}

/// Output controls.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
}

/// Image generation hints.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
}

// ============================================================================
// Response types
// ============================================================================

/// Response from `generateContent`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// One generated answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,

    #[serde(default)]
    pub finish_reason: Option<String>,

    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

/// Search grounding attached to a candidate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

/// A grounding chunk; only web chunks are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebChunk>,
}

/// A web page the answer was grounded on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebChunk {
    #[serde(default)]
    pub uri: String,

    #[serde(default)]
    pub title: String,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    /// Text of the first part of the first candidate that carries text.
    pub fn first_text(&self) -> Option<&str> {
        self.first_parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .find(|t| !t.trim().is_empty())
    }

    /// First inline image of the first candidate, if any.
    pub fn first_inline_data(&self) -> Option<&InlineData> {
        self.first_parts()
            .iter()
            .filter_map(|p| p.inline_data.as_ref())
            .find(|d| !d.data.is_empty())
    }

    /// Web grounding chunks of the first candidate, at most `limit`.
    pub fn web_chunks(&self, limit: usize) -> Vec<&WebChunk> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
            .map(|m| {
                m.grounding_chunks
                    .iter()
                    .filter_map(|chunk| chunk.web.as_ref())
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_format() {
        let client = GeminiClient::with_base_url("http://localhost:9999/v1beta/", KeyRing::new());
        assert_eq!(
            client.endpoint("gemini-3-flash-preview"),
            "http://localhost:9999/v1beta/models/gemini-3-flash-preview:generateContent"
        );
    }

    #[test]
    fn test_request_serialization() {
        let request = GenerateContentRequest::prompt("Describe the quokka")
            .with_google_search()
            .with_config(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                image_config: Some(ImageConfig {
                    aspect_ratio: Some("16:9".to_string()),
                    image_size: None,
                }),
                ..GenerationConfig::default()
            });

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "contents": [{ "role": "user", "parts": [{ "text": "Describe the quokka" }] }],
                "tools": [{ "googleSearch": {} }],
                "generationConfig": {
                    "responseMimeType": "application/json",
                    "imageConfig": { "aspectRatio": "16:9" }
                }
            })
        );
    }

    #[test]
    fn test_bare_request_omits_optional_fields() {
        let value = serde_json::to_value(GenerateContentRequest::prompt("hi")).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("generationConfig").is_none());
    }

    #[test]
    fn test_response_accessors() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "" },
                    { "inlineData": { "mimeType": "image/jpeg", "data": "QUJD" } },
                    { "text": "{\"isAnimal\": false}" }
                ]},
                "groundingMetadata": { "groundingChunks": [
                    { "web": { "uri": "https://a", "title": "A" } },
                    { "retrievedContext": {} },
                    { "web": { "uri": "https://b", "title": "B" } }
                ]}
            }]
        }))
        .unwrap();

        assert_eq!(response.first_text(), Some("{\"isAnimal\": false}"));
        assert_eq!(
            response.first_inline_data().unwrap().to_data_uri(),
            "data:image/jpeg;base64,QUJD"
        );
        let chunks = response.web_chunks(5);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].uri, "https://b");
        assert_eq!(response.web_chunks(1).len(), 1);
    }

    #[test]
    fn test_empty_response_accessors() {
        let response: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.first_text().is_none());
        assert!(response.first_inline_data().is_none());
        assert!(response.web_chunks(5).is_empty());
    }

    #[test]
    fn test_data_uri_defaults_to_png() {
        let data = InlineData {
            mime_type: String::new(),
            data: "AAAA".to_string(),
        };
        assert_eq!(data.to_data_uri(), "data:image/png;base64,AAAA");
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_network() {
        let client = GeminiClient::with_base_url("http://127.0.0.1:1", KeyRing::new());
        let err = client
            .generate_content("m", &GenerateContentRequest::prompt("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GeminiError::MissingCredential));
    }
}
