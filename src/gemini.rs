use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{GenerationError, Result};
use crate::settings::PipelineConfig;

const PROVIDER: &str = "gemini";

/// Story-structure and panel-content generation.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Raw model text for `prompt`.
    async fn generate_text(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// Panel artwork generation.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// The full response envelope; see [`extract_inline_image`].
    async fn generate_image(&self, prompt: &str, temperature: f32) -> Result<Value>;
}

#[derive(Debug, Serialize)]
struct GeminiPartsRequestText {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContentRequest {
    parts: Vec<GeminiPartsRequestText>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequestBody {
    contents: Vec<GeminiContentRequest>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    safety_settings: Option<Vec<SafetySetting>>,
}

impl GeminiRequestBody {
    fn text(prompt: &str, temperature: f32) -> Self {
        Self {
            contents: vec![GeminiContentRequest {
                parts: vec![GeminiPartsRequestText {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature,
                top_k: 32,
                top_p: 1.0,
                max_output_tokens: 4096,
                response_modalities: None,
                candidate_count: None,
            },
            safety_settings: None,
        }
    }

    /// Image models only return bytes when both modalities are requested.
    fn image(prompt: &str, temperature: f32) -> Self {
        let mut body = Self::text(prompt, temperature);
        body.generation_config.response_modalities = Some(vec!["TEXT", "IMAGE"]);
        body.generation_config.candidate_count = Some(1);
        body.safety_settings = Some(vec![
            SafetySetting {
                category: "HARM_CATEGORY_HARASSMENT",
                threshold: "BLOCK_MEDIUM_AND_ABOVE",
            },
            SafetySetting {
                category: "HARM_CATEGORY_HATE_SPEECH",
                threshold: "BLOCK_MEDIUM_AND_ABOVE",
            },
        ]);
        body
    }
}

#[derive(Debug, Deserialize)]
struct GeminiPartText {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    parts: Option<Vec<GeminiPartText>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseBody {
    candidates: Option<Vec<GeminiCandidate>>,
}

/// `candidates[0].content.parts[0].text`, or `EmptyGeneration`.
fn first_text(body: GeminiResponseBody) -> Result<String> {
    let first = body
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| GenerationError::EmptyGeneration {
            provider: PROVIDER,
            reason: "no candidates in response".to_string(),
        })?;
    let reason = first.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
    first
        .content
        .and_then(|c| c.parts)
        .and_then(|p| p.into_iter().next())
        .and_then(|p| p.text)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| GenerationError::EmptyGeneration {
            provider: PROVIDER,
            reason: format!("no content generated (finish reason: {reason})"),
        })
}

/// Base64 image bytes from the first candidate's inline-data parts.
///
/// `None` means the model answered without an image; callers substitute a
/// placeholder instead of failing.
pub fn extract_inline_image(envelope: &Value) -> Option<String> {
    let parts = envelope
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    parts.iter().find_map(|part| {
        ["inlineData", "inline_data"]
            .iter()
            .filter_map(|key| part.get(*key))
            .filter_map(|inline| inline.get("data").and_then(|d| d.as_str()))
            .find(|data| !data.is_empty())
            .map(str::to_string)
    })
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    text_model: String,
    image_model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, config: &PipelineConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey("Gemini"));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GenerationError::from_reqwest(PROVIDER, e))?;
        Ok(Self {
            api_key,
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            client,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn post(&self, model: &str, body: &GeminiRequestBody) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(self.endpoint(model))
            .header("X-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::from_reqwest(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GenerationError::from_status(PROVIDER, status.as_u16(), text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip(self, prompt), fields(model = %self.text_model, prompt_len = prompt.len()))]
    async fn generate_text(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = GeminiRequestBody::text(prompt, temperature);
        let resp = self.post(&self.text_model, &body).await?;
        let value: GeminiResponseBody = resp
            .json()
            .await
            .map_err(|e| GenerationError::from_reqwest(PROVIDER, e))?;
        let text = first_text(value)?;
        debug!(chars = text.len(), "text generated");
        Ok(text)
    }
}

#[async_trait]
impl ImageGenerator for GeminiClient {
    #[instrument(skip(self, prompt), fields(model = %self.image_model, prompt_len = prompt.len()))]
    async fn generate_image(&self, prompt: &str, temperature: f32) -> Result<Value> {
        let body = GeminiRequestBody::image(prompt, temperature);
        let resp = self.post(&self.image_model, &body).await?;
        resp.json()
            .await
            .map_err(|e| GenerationError::from_reqwest(PROVIDER, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{serve_once, Reply};
    use serde_json::json;

    #[test]
    fn text_request_shape() {
        let body = serde_json::to_value(GeminiRequestBody::text("hi", 0.8)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["generationConfig"]["topK"], 32);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
        assert!(body["generationConfig"].get("responseModalities").is_none());
        assert!(body.get("safetySettings").is_none());
    }

    #[test]
    fn image_request_declares_modalities_and_safety() {
        let body = serde_json::to_value(GeminiRequestBody::image("draw", 0.7)).unwrap();
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["TEXT", "IMAGE"]));
        assert_eq!(body["generationConfig"]["candidateCount"], 1);
        assert_eq!(body["safetySettings"][1]["category"], "HARM_CATEGORY_HATE_SPEECH");
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_MEDIUM_AND_ABOVE");
    }

    #[test]
    fn reads_first_candidate_text() {
        let body: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello world" }], "role": "model" } }]
        }))
        .unwrap();
        assert_eq!(first_text(body).unwrap(), "Hello world");
    }

    #[test]
    fn blocked_candidate_is_empty_generation() {
        let body: GeminiResponseBody = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "SAFETY", "index": 0 }]
        }))
        .unwrap();
        let err = first_text(body).unwrap_err();
        assert!(matches!(err, GenerationError::EmptyGeneration { .. }));
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn no_candidates_is_empty_generation() {
        let body: GeminiResponseBody = serde_json::from_value(json!({})).unwrap();
        assert!(first_text(body).unwrap_err().is_retryable());
    }

    #[test]
    fn finds_inline_data_after_text_part() {
        let envelope = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "Here is your panel" },
                { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
            ]}}]
        });
        assert_eq!(extract_inline_image(&envelope).as_deref(), Some("iVBORw0KGgo="));
    }

    #[test]
    fn missing_inline_data_is_none() {
        let envelope = json!({
            "candidates": [{ "content": { "parts": [{ "text": "I cannot draw that" }] } }]
        });
        assert_eq!(extract_inline_image(&envelope), None);
        assert_eq!(extract_inline_image(&json!({ "candidates": [] })), None);
    }

    fn stub_config(base_url: &str) -> PipelineConfig {
        PipelineConfig {
            gemini_base_url: base_url.to_string(),
            text_model: "text-model".into(),
            image_model: "image-model".into(),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn text_call_posts_to_model_endpoint_with_key() {
        let (base, server) = serve_once(Reply::json(
            200,
            json!({ "candidates": [{ "content": { "parts": [{ "text": "Once upon a time" }] } }] }),
        ))
        .await;
        let client = GeminiClient::new("secret-key", &stub_config(&base)).unwrap();

        let text = client.generate_text("tell me a story", 0.8).await.unwrap();
        assert_eq!(text, "Once upon a time");

        let req = server.await.unwrap();
        assert!(
            req.head.starts_with("post /models/text-model:generatecontent http/1.1"),
            "{}",
            req.head
        );
        assert!(req.head.contains("x-goog-api-key: secret-key"));
        let body: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "tell me a story");
        assert!(body["generationConfig"]["temperature"].is_number());
    }

    #[tokio::test]
    async fn image_call_uses_image_model_and_returns_envelope() {
        let envelope = json!({ "candidates": [{ "content": { "parts": [
            { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
        ] } }] });
        let (base, server) = serve_once(Reply::json(200, envelope.clone())).await;
        let client = GeminiClient::new("secret-key", &stub_config(&base)).unwrap();

        let got = client.generate_image("draw a banana", 0.7).await.unwrap();
        assert_eq!(got, envelope);

        let req = server.await.unwrap();
        assert!(req.head.starts_with("post /models/image-model:generatecontent"), "{}", req.head);
        let body: Value = serde_json::from_str(&req.body).unwrap();
        assert_eq!(body["generationConfig"]["responseModalities"], json!(["TEXT", "IMAGE"]));
    }

    #[tokio::test]
    async fn http_429_becomes_rate_limited() {
        let (base, server) = serve_once(Reply::bytes(429, "text/plain", b"quota exhausted")).await;
        let client = GeminiClient::new("k", &stub_config(&base)).unwrap();

        let err = client.generate_text("hi", 0.8).await.unwrap_err();
        server.await.unwrap();
        match err {
            GenerationError::RateLimited { provider, body } => {
                assert_eq!(provider, "gemini");
                assert_eq!(body, "quota exhausted");
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_body() {
        let (base, server) = serve_once(Reply::bytes(500, "text/plain", b"backend down")).await;
        let client = GeminiClient::new("k", &stub_config(&base)).unwrap();

        let err = client.generate_image("draw", 0.7).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, GenerationError::UpstreamHttp { status: 500, ref body, .. } if body == "backend down"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn success_without_candidates_is_empty_generation() {
        let (base, server) = serve_once(Reply::json(200, json!({ "candidates": [] }))).await;
        let client = GeminiClient::new("k", &stub_config(&base)).unwrap();

        let err = client.generate_text("hi", 0.8).await.unwrap_err();
        server.await.unwrap();
        assert!(matches!(err, GenerationError::EmptyGeneration { .. }));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = GeminiClient::new("  ", &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey("Gemini")));
    }
}
