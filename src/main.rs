use std::sync::Arc;

use clap::Parser;
use skygram::cli::CliOptions;
use skygram::config::{ServerConfig, setup_logging};
use skygram::pipeline::Pipeline;
use skygram::storage::ImageStore;
use skygram::upstream::{
    GeminiRecognizer, HuggingFaceGenerator, ImageGenerator, MockGenerator, MockRecognizer,
    Recognizer, http_client,
};
use tracing::{error, info, warn};

type Upstreams = (Arc<dyn Recognizer>, Arc<dyn ImageGenerator>);

fn build_upstreams(cli: &CliOptions, config: &ServerConfig) -> Result<Upstreams, String> {
    if cli.mock_upstreams {
        info!("Using mock upstreams, no external APIs will be called");
        let recognizer: Arc<dyn Recognizer> = Arc::new(MockRecognizer::cycling());
        let generator: Arc<dyn ImageGenerator> = Arc::new(MockGenerator::placeholder());
        return Ok((recognizer, generator));
    }

    if cli.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY is not set, every cloud will get the fallback label");
    }
    if cli.hf_token.is_none() {
        warn!("HF_TOKEN is not set, every cloud will get placeholder art");
    }

    let client = http_client(config.upstream_timeout).map_err(|err| err.to_string())?;
    let recognizer: Arc<dyn Recognizer> = Arc::new(GeminiRecognizer::new(
        client.clone(),
        cli.gemini_api_key.clone(),
        &cli.gemini_base_url,
        &cli.gemini_model,
    ));
    let generator: Arc<dyn ImageGenerator> = Arc::new(HuggingFaceGenerator::new(
        client,
        cli.hf_token.clone(),
        &cli.hf_base_url,
        &cli.hf_model,
    ));
    Ok((recognizer, generator))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = CliOptions::parse();

    if setup_logging(cli.debug).is_err() {
        return;
    }

    let config = match ServerConfig::try_from(&cli) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return;
        }
    };

    let (recognizer, generator) = match build_upstreams(&cli, &config) {
        Ok(upstreams) => upstreams,
        Err(err) => {
            error!("Failed to set up upstream clients: {}", err);
            return;
        }
    };

    let images = ImageStore::new(&config.upload_dir, &config.generated_dir);
    let pipeline = Pipeline::new(recognizer, generator, images)
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_public_base_url(config.public_base_url.clone())
        .with_session_ttl(config.session_ttl);

    if let Err(err) = skygram::web::setup_server(config, Arc::new(pipeline)).await {
        error!("Application error: {}", err);
    }
}
