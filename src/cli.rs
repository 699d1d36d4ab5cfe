//! CLI parser
use clap::Parser;
use std::num::NonZeroU16;
use std::path::PathBuf;

use crate::constants::{
    DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL, DEFAULT_HF_BASE_URL, DEFAULT_HF_MODEL,
    DEFAULT_MAX_UPLOAD_BYTES,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "skygram", about = "Turns photos of clouds into cloud art")]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "SKYGRAM_DEBUG")]
    /// Enable debug logging. Env: SKYGRAM_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "8000", env = "PORT")]
    /// http listener, defaults to `8000`.
    /// Env: PORT
    pub port: NonZeroU16,
    #[clap(long, short, default_value = "0.0.0.0", env = "HOST")]
    /// Listen address, defaults to `0.0.0.0`.
    /// Env: HOST
    pub listen_address: String,

    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    /// Gemini API key for cloud recognition. Env: GEMINI_API_KEY
    pub gemini_api_key: Option<String>,
    #[clap(long, default_value = DEFAULT_GEMINI_MODEL, env = "SKYGRAM_GEMINI_MODEL")]
    /// Gemini model used to name the cloud
    pub gemini_model: String,
    #[clap(long, default_value = DEFAULT_GEMINI_BASE_URL, env = "SKYGRAM_GEMINI_BASE_URL")]
    /// Gemini API base URL
    pub gemini_base_url: String,

    #[clap(long, env = "HF_TOKEN", hide_env_values = true)]
    /// Hugging Face token for image generation. Env: HF_TOKEN
    pub hf_token: Option<String>,
    #[clap(long, default_value = DEFAULT_HF_MODEL, env = "SKYGRAM_HF_MODEL")]
    /// Hugging Face text-to-image model
    pub hf_model: String,
    #[clap(long, default_value = DEFAULT_HF_BASE_URL, env = "SKYGRAM_HF_BASE_URL")]
    /// Hugging Face inference API base URL
    pub hf_base_url: String,

    #[clap(long, help = "Use local mock upstreams instead of the real APIs")]
    /// Swap both upstream clients for deterministic mocks
    pub mock_upstreams: bool,

    #[clap(
        long,
        default_value = "http://localhost:3000,http://localhost:5173",
        env = "ALLOWED_ORIGINS"
    )]
    /// Comma-separated CORS allow-list. Env: ALLOWED_ORIGINS
    pub allowed_origins: String,

    #[clap(long, env = "SKYGRAM_PUBLIC_BASE_URL")]
    /// Externally advertised base URL, eg `https://skygram.example.com`.
    /// When unset, result URLs are relative.
    pub public_base_url: Option<String>,

    #[clap(long, default_value = "uploads", env = "SKYGRAM_UPLOAD_DIR")]
    /// Where original uploads are written
    pub upload_dir: PathBuf,
    #[clap(long, default_value = "generated", env = "SKYGRAM_GENERATED_DIR")]
    /// Where generated art is written
    pub generated_dir: PathBuf,

    #[clap(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "SKYGRAM_MAX_UPLOAD_BYTES")]
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
    #[clap(long, default_value = "30", env = "SKYGRAM_UPSTREAM_TIMEOUT_SECS")]
    /// Timeout for each upstream API call
    pub upstream_timeout_secs: u64,
    #[clap(long, default_value = "86400", env = "SKYGRAM_SESSION_TTL_SECS")]
    /// How long a session and its files are kept
    pub session_ttl_secs: u64,
    #[clap(long, default_value = "300", env = "SKYGRAM_SWEEP_INTERVAL_SECS")]
    /// How often expired sessions are swept
    pub sweep_interval_secs: u64,
}
