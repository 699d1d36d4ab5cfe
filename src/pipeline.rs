//! Runs one upload through recognition, generation and captioning.
//!
//! Stages run once each, in order. Upstream failures never fail the request:
//! the stage's fallback value is substituted, logged, and recorded on the
//! session so the result can say it is degraded. Storage failures are fatal
//! and take the half-built session with them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::captions::CaptionPool;
use crate::constants::{DEFAULT_MAX_UPLOAD_BYTES, FALLBACK_LABEL, generation_prompt};
use crate::error::SkygramError;
use crate::session::{Session, SessionId, SessionStore, Stage};
use crate::storage::{
    ImageStore, ValidImage, generated_filename, normalize_to_png, placeholder_png,
};
use crate::upstream::{ImageGenerator, Recognizer};

/// Raw upload as it came off the wire.
#[derive(Clone, Debug)]
pub struct Upload {
    /// Declared content type of the file field
    pub content_type: Option<String>,
    /// File contents
    pub bytes: Vec<u8>,
}

/// Whether every upstream call succeeded.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Real answers from both upstreams
    Complete,
    /// At least one fallback value was substituted
    Degraded,
}

/// What `/process-cloud` returns: a snapshot of a finished session.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessingResult {
    /// Session key
    pub session_id: String,
    /// What the cloud looks like
    pub detected_object: String,
    /// Joke caption
    pub caption: String,
    /// Where to fetch the original upload
    pub original_image_url: String,
    /// Where to fetch the generated art
    pub generated_image_url: String,
    /// Where to download the generated art
    pub download_url: String,
    /// Real success or masked failure
    pub status: ProcessingStatus,
    /// Stages that fell back to a placeholder
    pub fallbacks: Vec<Stage>,
}

impl ProcessingResult {
    fn from_session(session: &Session, base: Option<&Url>) -> Result<Self, SkygramError> {
        let detected_object = session.detected_object.clone().ok_or_else(|| {
            SkygramError::InternalServerError(format!("session {} has no label", session.id))
        })?;
        let caption = session.caption.clone().ok_or_else(|| {
            SkygramError::InternalServerError(format!("session {} has no caption", session.id))
        })?;
        let filename = session.generated_filename().ok_or_else(|| {
            SkygramError::InternalServerError(format!("session {} has no art", session.id))
        })?;

        Ok(Self {
            session_id: session.id.to_string(),
            detected_object,
            caption,
            original_image_url: public_url(base, &format!("/images/original/{}", session.id))?,
            generated_image_url: public_url(base, &format!("/images/generated/{filename}"))?,
            download_url: public_url(base, &format!("/download/{filename}"))?,
            status: if session.fallbacks.is_empty() {
                ProcessingStatus::Complete
            } else {
                ProcessingStatus::Degraded
            },
            fallbacks: session.fallbacks.clone(),
        })
    }
}

/// Relative path, or absolute URL when a public base is configured.
fn public_url(base: Option<&Url>, path: &str) -> Result<String, SkygramError> {
    match base {
        Some(base) => Ok(base.join(path.trim_start_matches('/'))?.to_string()),
        None => Ok(path.to_string()),
    }
}

/// Upstream client health and storage details for `/health`.
#[derive(Clone, Debug)]
pub struct HealthReport {
    /// Recognition client state
    pub gemini: &'static str,
    /// Generation client state
    pub huggingface: &'static str,
    /// Where originals live
    pub uploads: String,
    /// Where generated art lives
    pub generated: String,
    /// Live session count
    pub sessions: usize,
}

/// Owns the upstream clients, the image store and the session store.
pub struct Pipeline {
    recognizer: Arc<dyn Recognizer>,
    generator: Arc<dyn ImageGenerator>,
    captions: CaptionPool,
    images: ImageStore,
    sessions: SessionStore,
    max_upload_bytes: usize,
    public_base_url: Option<Url>,
    session_ttl: Duration,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("images", &self.images)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("public_base_url", &self.public_base_url)
            .field("session_ttl", &self.session_ttl)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Pipeline with the default caption pool, a 10MiB limit, relative URLs
    /// and a one day session TTL.
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        generator: Arc<dyn ImageGenerator>,
        images: ImageStore,
    ) -> Self {
        Self {
            recognizer,
            generator,
            captions: CaptionPool::default(),
            images,
            sessions: SessionStore::new(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            public_base_url: None,
            session_ttl: Duration::from_secs(60 * 60 * 24),
        }
    }

    /// Replaces the caption pool.
    pub fn with_captions(mut self, captions: CaptionPool) -> Self {
        self.captions = captions;
        self
    }

    /// Sets the upload size limit.
    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Makes result URLs absolute under `base`.
    pub fn with_public_base_url(mut self, base: Option<Url>) -> Self {
        self.public_base_url = base;
        self
    }

    /// Sets how long sessions live.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Upload size limit, in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// The session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The image store.
    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    /// Validates, stores and processes one upload.
    #[instrument(skip_all, fields(size = upload.bytes.len()))]
    pub async fn process(&self, upload: Upload) -> Result<ProcessingResult, SkygramError> {
        if upload.bytes.len() > self.max_upload_bytes {
            return Err(SkygramError::PayloadTooLarge(self.max_upload_bytes));
        }
        let image = ValidImage::from_upload(upload.content_type.as_deref(), upload.bytes)?;

        let id = SessionId::new();
        let original_path = self.images.save_original(&id, &image).await?;
        info!("Saved original image: {}", original_path.display());

        let session = Session::new(id, original_path.clone(), image.mime());
        if let Err(err) = self.sessions.insert(session).await {
            self.images.remove_files(&[original_path]).await;
            return Err(err);
        }

        match self.run_stages(&id, &image).await {
            Ok(result) => {
                info!(
                    "Session {} done: {} ({:?})",
                    result.session_id, result.detected_object, result.status
                );
                Ok(result)
            }
            Err(err) => {
                error!("Session {id} failed: {err}");
                self.discard(&id).await;
                Err(err)
            }
        }
    }

    async fn run_stages(
        &self,
        id: &SessionId,
        image: &ValidImage,
    ) -> Result<ProcessingResult, SkygramError> {
        let label = match self.recognizer.recognize(&image.bytes, image.mime()).await {
            Ok(label) => {
                info!("Identified object: {label}");
                self.sessions
                    .update(id, |session| session.detected_object = Some(label.clone()))
                    .await?;
                label
            }
            Err(err) => {
                warn!("Session {id}: recognition failed, using fallback label: {err}");
                self.sessions
                    .update(id, |session| {
                        session.detected_object = Some(FALLBACK_LABEL.to_string());
                        session.fallbacks.push(Stage::Recognition);
                    })
                    .await?;
                FALLBACK_LABEL.to_string()
            }
        };

        let prompt = generation_prompt(&label);
        debug!("Generation prompt: {prompt}");
        let generated = self
            .generator
            .generate(&prompt)
            .await
            .and_then(|bytes| normalize_to_png(&bytes));
        let png = match generated {
            Ok(png) => png,
            Err(err) => {
                warn!("Session {id}: generation failed, using placeholder art: {err}");
                self.sessions
                    .update(id, |session| session.fallbacks.push(Stage::Generation))
                    .await?;
                placeholder_png()?
            }
        };

        let generated_path = match self.images.save_generated(id, &label, &png).await {
            Ok(path) => path,
            Err(err) => {
                let partial = self
                    .images
                    .generated_dir()
                    .join(generated_filename(id, &label));
                self.images.remove_files(&[partial]).await;
                return Err(err);
            }
        };
        info!("Saved generated image: {}", generated_path.display());

        let caption = self.captions.pick(&label).to_string();
        let session = self
            .sessions
            .update(id, |session| {
                session.generated_path = Some(generated_path);
                session.caption = Some(caption);
                session.completed_at = Some(Utc::now());
            })
            .await?;

        ProcessingResult::from_session(&session, self.public_base_url.as_ref())
    }

    async fn discard(&self, id: &SessionId) {
        if let Some(session) = self.sessions.remove(id).await {
            self.images.remove_files(&session.files()).await;
        }
    }

    /// Path and content type of a session's original upload.
    pub async fn original(
        &self,
        session_id: &str,
    ) -> Result<(PathBuf, &'static str), SkygramError> {
        let session = self.lookup(session_id).await?;
        Ok((session.original_path, session.original_mime))
    }

    /// Path of generated art by its public filename, `<session id>_<slug>.png`.
    pub async fn generated(&self, filename: &str) -> Result<PathBuf, SkygramError> {
        let not_found = || SkygramError::NotFound(format!("generated image {filename}"));
        let session_id = filename
            .strip_suffix(".png")
            .and_then(|stem| stem.split_once('_'))
            .map(|(id, _)| id)
            .ok_or_else(not_found)?;
        let session = self.lookup(session_id).await?;
        if session.generated_filename() != Some(filename) {
            return Err(not_found());
        }
        session.generated_path.ok_or_else(not_found)
    }

    async fn lookup(&self, session_id: &str) -> Result<Session, SkygramError> {
        let id = SessionId::parse(session_id)
            .ok_or_else(|| SkygramError::NotFound(format!("session {session_id}")))?;
        self.sessions
            .get(&id)
            .await
            .ok_or_else(|| SkygramError::NotFound(format!("session {session_id}")))
    }

    /// Evicts finished sessions past their TTL and deletes their files.
    pub async fn sweep(&self) -> usize {
        let expired = self
            .sessions
            .evict_expired(Utc::now(), self.session_ttl)
            .await;
        for session in &expired {
            self.images.remove_files(&session.files()).await;
        }
        if !expired.is_empty() {
            info!("Evicted {} expired sessions", expired.len());
        }
        expired.len()
    }

    /// Snapshot for the health endpoint.
    pub async fn health(&self) -> HealthReport {
        HealthReport {
            gemini: self.recognizer.health(),
            huggingface: self.generator.health(),
            uploads: self.images.upload_dir().display().to_string(),
            generated: self.images.generated_dir().display().to_string(),
            sessions: self.sessions.len().await,
        }
    }
}

/// Runs [`Pipeline::sweep`] every `every` until the sweeper holds the last
/// reference to the pipeline.
pub fn spawn_sweeper(pipeline: Arc<Pipeline>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if Arc::strong_count(&pipeline) == 1 {
                debug!("Pipeline dropped, stopping sweeper");
                break;
            }
            pipeline.sweep().await;
        }
    })
}
