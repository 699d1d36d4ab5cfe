//! Clients for the third-party recognition and image-generation APIs.
//!
//! Both sit behind traits so the pipeline can run against mocks.

pub mod gemini;
pub mod huggingface;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::SkygramError;

pub use gemini::GeminiRecognizer;
pub use huggingface::HuggingFaceGenerator;
pub use mock::{MockGenerator, MockRecognizer};

/// Names what a cloud photo looks like.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Short, lowercase label for the image, eg `dragon`.
    async fn recognize(&self, image: &[u8], mime: &str) -> Result<String, SkygramError>;

    /// How `/health` reports this client.
    fn health(&self) -> &'static str;
}

/// Renders an image from a text prompt.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Raw image bytes, in whatever format the service returns.
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, SkygramError>;

    /// How `/health` reports this client.
    fn health(&self) -> &'static str;
}

/// Shared HTTP client for the upstream APIs.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, SkygramError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| SkygramError::Config(format!("Failed to build HTTP client: {err}")))
}

/// Turns a chatty model answer into a single label: first non-empty line,
/// trimmed of quotes and punctuation, lowercased.
pub fn clean_label(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let label = line
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if label.is_empty() { None } else { Some(label) }
}

/// Health value for a client that may be missing its credential.
pub(crate) fn credential_health(configured: bool) -> &'static str {
    if configured { "configured" } else { "missing" }
}
