//! Cloud recognition through Gemini's `generateContent` endpoint.
//!
//! Docs: <https://ai.google.dev/api/generate-content>

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Recognizer, clean_label, credential_health};
use crate::constants::RECOGNITION_PROMPT;
use crate::error::SkygramError;

#[derive(Serialize, Debug)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize, Debug)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

/// Pulls the label out of a raw `generateContent` response body.
fn label_from_response(body: &[u8]) -> Result<String, SkygramError> {
    let parsed: GenerateContentResponse = serde_json::from_slice(body)
        .map_err(|err| SkygramError::Upstream(format!("unparsable Gemini response: {err}")))?;

    if let Some(reason) = parsed
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(SkygramError::Upstream(format!(
            "Gemini blocked the prompt: {reason}"
        )));
    }

    let text = parsed
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .find_map(|part| part.text)
        .ok_or_else(|| SkygramError::Upstream("Gemini response had no text".to_string()))?;

    clean_label(&text)
        .ok_or_else(|| SkygramError::Upstream(format!("Gemini answer had no label: {text:?}")))
}

/// Asks a Gemini vision model what the cloud looks like.
#[derive(Clone, Debug)]
pub struct GeminiRecognizer {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl GeminiRecognizer {
    /// Client for `model` under `base_url`. A missing key makes every call
    /// fail as an upstream error.
    pub fn new(
        client: reqwest::Client,
        api_key: Option<String>,
        base_url: &str,
        model: &str,
    ) -> Self {
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model
        );
        Self {
            client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            endpoint,
        }
    }
}

#[async_trait]
impl Recognizer for GeminiRecognizer {
    #[instrument(skip_all, fields(mime = %mime, size = image.len()))]
    async fn recognize(&self, image: &[u8], mime: &str) -> Result<String, SkygramError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SkygramError::Upstream("GEMINI_API_KEY is not set".to_string()))?;

        let req_body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Text {
                        text: RECOGNITION_PROMPT,
                    },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: mime,
                            data: general_purpose::STANDARD.encode(image),
                        },
                    },
                ],
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&req_body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(SkygramError::Upstream(format!(
                "Gemini API error {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        let label = label_from_response(&bytes)?;
        debug!("Gemini says the cloud is a {label}");
        Ok(label)
    }

    fn health(&self) -> &'static str {
        credential_health(self.api_key.is_some())
    }
}
