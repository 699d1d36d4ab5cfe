//! Cloud art generation through the Hugging Face inference API.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use super::{ImageGenerator, credential_health};
use crate::error::SkygramError;
use crate::storage::sniff_image;

#[derive(Serialize, Debug)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

/// Text-to-image client for a Hugging Face hosted model.
#[derive(Clone, Debug)]
pub struct HuggingFaceGenerator {
    client: reqwest::Client,
    token: Option<String>,
    endpoint: String,
}

impl HuggingFaceGenerator {
    /// Client for `model` under `base_url`. A missing token makes every call
    /// fail as an upstream error.
    pub fn new(
        client: reqwest::Client,
        token: Option<String>,
        base_url: &str,
        model: &str,
    ) -> Self {
        let endpoint = format!(
            "{}/models/{}",
            base_url.trim_end_matches('/'),
            model.trim_matches('/')
        );
        Self {
            client,
            token: token.filter(|token| !token.trim().is_empty()),
            endpoint,
        }
    }
}

#[async_trait]
impl ImageGenerator for HuggingFaceGenerator {
    #[instrument(skip_all)]
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, SkygramError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| SkygramError::Upstream("HF_TOKEN is not set".to_string()))?;

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&InferenceRequest { inputs: prompt })
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        if !status.is_success() {
            return Err(SkygramError::Upstream(format!(
                "Hugging Face API error {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }

        // errors sometimes come back as 200 with a JSON body
        let format = sniff_image(&bytes).map_err(|_| {
            SkygramError::Upstream(format!(
                "Hugging Face returned something that isn't an image: {}",
                String::from_utf8_lossy(&bytes[..bytes.len().min(200)])
            ))
        })?;
        debug!("Hugging Face returned {} bytes of {format:?}", bytes.len());
        Ok(bytes.to_vec())
    }

    fn health(&self) -> &'static str {
        credential_health(self.token.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::placeholder_png;
    use crate::upstream::mock::spawn_fake_api;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn generate_against_fake_api() {
        let png = placeholder_png().expect("png");
        let served = png.clone();
        let app = Router::new()
            .route(
                "/models/acme/sky-art",
                axum::routing::post(move |headers: HeaderMap| {
                    let served = served.clone();
                    async move {
                        let authorized = headers
                            .get("authorization")
                            .is_some_and(|value| value == "Bearer hf_test");
                        if authorized {
                            served.into_response()
                        } else {
                            StatusCode::UNAUTHORIZED.into_response()
                        }
                    }
                }),
            )
            .route(
                "/models/acme/loading",
                axum::routing::post(|| async { r#"{"error":"Model is currently loading"}"# }),
            );
        let base = spawn_fake_api(app).await;

        let generator = HuggingFaceGenerator::new(
            reqwest::Client::new(),
            Some("hf_test".to_string()),
            &base,
            "acme/sky-art",
        );
        let bytes = generator.generate("a dragon").await.expect("generate");
        assert_eq!(bytes, png);

        let loading = HuggingFaceGenerator::new(
            reqwest::Client::new(),
            Some("hf_test".to_string()),
            &base,
            "acme/loading",
        );
        assert!(matches!(
            loading.generate("a dragon").await,
            Err(SkygramError::Upstream(_))
        ));

        let unauthorized = HuggingFaceGenerator::new(
            reqwest::Client::new(),
            Some("hf_wrong".to_string()),
            &base,
            "acme/sky-art",
        );
        assert!(unauthorized.generate("a dragon").await.is_err());
    }

    #[tokio::test]
    async fn unreachable_api_is_an_upstream_error() {
        let generator = HuggingFaceGenerator::new(
            reqwest::Client::new(),
            Some("hf_test".to_string()),
            "http://127.0.0.1:9",
            "acme/sky-art",
        );
        assert!(matches!(
            generator.generate("a dragon").await,
            Err(SkygramError::Upstream(_))
        ));
        assert_eq!(generator.health(), "configured");
        assert_eq!(
            HuggingFaceGenerator::new(reqwest::Client::new(), None, "http://x", "m").health(),
            "missing"
        );
    }
}
