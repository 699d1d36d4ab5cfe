//! Local stand-ins for the upstream APIs, for demos and tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{ImageGenerator, Recognizer};
use crate::error::SkygramError;
use crate::storage::placeholder_png;

/// Labels the cycling mock hands out, in order.
pub const MOCK_OBJECTS: [&str; 5] = ["dragon", "dog", "castle", "face", "ship"];

#[derive(Debug)]
enum RecognizerMode {
    Cycle,
    Fixed(String),
    Fail,
}

/// Recognizer that never leaves the process.
#[derive(Debug)]
pub struct MockRecognizer {
    mode: RecognizerMode,
    calls: AtomicUsize,
}

impl MockRecognizer {
    /// Cycles through [`MOCK_OBJECTS`].
    pub fn cycling() -> Self {
        Self::with_mode(RecognizerMode::Cycle)
    }

    /// Always answers `label`.
    pub fn fixed(label: &str) -> Self {
        Self::with_mode(RecognizerMode::Fixed(label.to_string()))
    }

    /// Always fails like an unreachable API.
    pub fn failing() -> Self {
        Self::with_mode(RecognizerMode::Fail)
    }

    fn with_mode(mode: RecognizerMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    /// How many times `recognize` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(&self, _image: &[u8], _mime: &str) -> Result<String, SkygramError> {
        let seq = self.calls.fetch_add(1, Ordering::Relaxed);
        match &self.mode {
            RecognizerMode::Cycle => Ok(MOCK_OBJECTS[seq % MOCK_OBJECTS.len()].to_string()),
            RecognizerMode::Fixed(label) => Ok(label.clone()),
            RecognizerMode::Fail => Err(SkygramError::Upstream(
                "mock recognizer is unreachable".to_string(),
            )),
        }
    }

    fn health(&self) -> &'static str {
        "mock"
    }
}

#[derive(Debug)]
enum GeneratorMode {
    Placeholder,
    Bytes(Vec<u8>),
    Fail,
}

/// Generator that never leaves the process.
#[derive(Debug)]
pub struct MockGenerator {
    mode: GeneratorMode,
    calls: AtomicUsize,
    last_prompt: std::sync::Mutex<Option<String>>,
}

impl MockGenerator {
    /// Returns the placeholder sky.
    pub fn placeholder() -> Self {
        Self::with_mode(GeneratorMode::Placeholder)
    }

    /// Returns `bytes` verbatim.
    pub fn returning(bytes: Vec<u8>) -> Self {
        Self::with_mode(GeneratorMode::Bytes(bytes))
    }

    /// Always fails like an unreachable API.
    pub fn failing() -> Self {
        Self::with_mode(GeneratorMode::Fail)
    }

    fn with_mode(mode: GeneratorMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            last_prompt: std::sync::Mutex::new(None),
        }
    }

    /// How many times `generate` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Prompt from the most recent call.
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt
            .lock()
            .ok()
            .and_then(|prompt| prompt.clone())
    }
}

#[async_trait]
impl ImageGenerator for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, SkygramError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.to_string());
        }
        match &self.mode {
            GeneratorMode::Placeholder => placeholder_png(),
            GeneratorMode::Bytes(bytes) => Ok(bytes.clone()),
            GeneratorMode::Fail => Err(SkygramError::Upstream(
                "mock generator is unreachable".to_string(),
            )),
        }
    }

    fn health(&self) -> &'static str {
        "mock"
    }
}

/// Serves `app` on an ephemeral local port, returning its base URL.
#[cfg(test)]
pub(crate) async fn spawn_fake_api(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake api");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cycling_recognizer_walks_the_list() {
        let recognizer = MockRecognizer::cycling();
        for expected in MOCK_OBJECTS.iter().chain(MOCK_OBJECTS.iter().take(1)) {
            let label = recognizer.recognize(b"", "image/png").await.expect("label");
            assert_eq!(&label, expected);
        }
        assert_eq!(recognizer.calls(), MOCK_OBJECTS.len() + 1);
    }

    #[tokio::test]
    async fn generator_records_prompt() {
        let generator = MockGenerator::returning(vec![1, 2, 3]);
        assert_eq!(generator.generate("a ship").await.expect("bytes"), vec![1, 2, 3]);
        assert_eq!(generator.last_prompt().as_deref(), Some("a ship"));
        assert!(MockGenerator::failing().generate("x").await.is_err());
    }
}
