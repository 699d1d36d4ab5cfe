//! Shared constants/setters for things
//!

use std::sync::LazyLock;

/// Multipart field carrying the uploaded photo.
pub const UPLOAD_FIELD_NAME: &str = "file";

/// Default upload size limit, 10MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Extra room on top of the upload limit for multipart framing.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Label used when the recognition API can't tell us what the cloud is.
pub const FALLBACK_LABEL: &str = "fluffy cloud";

/// What we ask the vision model.
pub const RECOGNITION_PROMPT: &str = "Reply with only one short noun for what this cloud most resembles. Be creative but keep it simple.";

/// Builds the text-to-image prompt for a detected object.
pub fn generation_prompt(label: &str) -> String {
    format!(
        "A beautiful, artistic representation of a {label} made entirely of fluffy white clouds against a bright blue sky, photorealistic, high quality, dreamy atmosphere"
    )
}

/// Captions handed out with each result.
pub const FUNNY_CAPTIONS: [&str; 6] = [
    "Nature's got jokes! 🌤️",
    "When clouds have better imagination than humans 🤭",
    "Sky doodles by Mother Nature 🎨",
    "Clouds: Nature's abstract artists 🎭",
    "The sky is the limit for cloud creativity ✨",
    "Every cloud has a silver lining... and a funny shape! 😄",
];

/// Prefix for the filename offered by the download endpoint.
pub const DOWNLOAD_FILENAME_PREFIX: &str = "cloud-art-";

/// Side length of the placeholder art, in pixels.
pub const PLACEHOLDER_SIZE: u32 = 512;

/// Max age (in seconds) for image cache entries.
pub const IMAGE_CACHE_MAX_AGE_SECONDS: u64 = 60 * 60;

/// Cache-Control value for image responses. Session images are per-user so
/// shared caches shouldn't hold on to them.
pub static IMAGE_CACHE_CONTROL: LazyLock<String> =
    LazyLock::new(|| format!("private, max-age={}", IMAGE_CACHE_MAX_AGE_SECONDS));

/// Default Gemini model used for recognition.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Default Gemini API base.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default Hugging Face text-to-image model.
pub const DEFAULT_HF_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

/// Default Hugging Face inference API base.
pub const DEFAULT_HF_BASE_URL: &str = "https://api-inference.huggingface.co";
