//! Config handling

use std::path::PathBuf;
use std::time::Duration;

use axum::http::HeaderValue;
use tracing::log::LevelFilter;
use url::Url;

use crate::cli::CliOptions;
use crate::error::SkygramError;

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// Runtime settings, validated from the CLI options.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub listen_address: String,
    /// Port the listener binds to
    pub port: u16,
    /// Origins allowed by CORS
    pub allowed_origins: Vec<HeaderValue>,
    /// Base URL result links are joined onto, if any
    pub public_base_url: Option<Url>,
    /// Directory for original uploads
    pub upload_dir: PathBuf,
    /// Directory for generated art
    pub generated_dir: PathBuf,
    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,
    /// Timeout for each upstream call
    pub upstream_timeout: Duration,
    /// How long sessions live
    pub session_ttl: Duration,
    /// How often the sweeper runs
    pub sweep_interval: Duration,
}

impl TryFrom<&CliOptions> for ServerConfig {
    type Error = SkygramError;

    fn try_from(cli: &CliOptions) -> Result<Self, Self::Error> {
        let allowed_origins = parse_origins(&cli.allowed_origins)?;
        let public_base_url = cli
            .public_base_url
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(parse_base_url)
            .transpose()?;

        if cli.max_upload_bytes == 0 {
            return Err(SkygramError::Config(
                "max upload size must be greater than zero".to_string(),
            ));
        }
        if cli.session_ttl_secs == 0 {
            return Err(SkygramError::Config(
                "session TTL must be greater than zero".to_string(),
            ));
        }
        if cli.sweep_interval_secs == 0 {
            return Err(SkygramError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            listen_address: cli.listen_address.clone(),
            port: cli.port.get(),
            allowed_origins,
            public_base_url,
            upload_dir: cli.upload_dir.clone(),
            generated_dir: cli.generated_dir.clone(),
            max_upload_bytes: cli.max_upload_bytes,
            upstream_timeout: Duration::from_secs(cli.upstream_timeout_secs),
            session_ttl: Duration::from_secs(cli.session_ttl_secs),
            sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
        })
    }
}

/// Splits the comma-separated CORS list, skipping blanks.
pub fn parse_origins(raw: &str) -> Result<Vec<HeaderValue>, SkygramError> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| SkygramError::Config(format!("invalid CORS origin: {origin}")))
        })
        .collect()
}

/// Parses the public base URL, making sure joins land under its path.
pub fn parse_base_url(raw: &str) -> Result<Url, SkygramError> {
    let mut url = Url::parse(raw.trim())?;
    if url.cannot_be_a_base() {
        return Err(SkygramError::Config(format!("not a base URL: {raw}")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
