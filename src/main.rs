// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use geoprivacy_node::{
    api::{start_server, AppState},
    config::Settings,
    geo::{
        CueDetector, CueOrchestrator, GeocodeThrottle, GroundingSidecarClient, NominatimClient,
        VlmGeoClient,
    },
    mask::MaskingEngine,
    pii::{NamedEntityRecognizer, OnnxNerModel, PiiResolver},
    version,
};

#[derive(Parser, Debug)]
#[command(name = "geoprivacy-node", about = "Privacy scrubbing for images and text")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, env = "GEOPRIVACY_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    info!("Starting GeoPrivacy Node {}", version::VERSION);

    // External capabilities
    let hypothesis = VlmGeoClient::new(
        &settings.hypothesis.endpoint,
        &settings.hypothesis.model,
        settings.hypothesis.api_key.clone(),
    )
    .context("failed to construct hypothesis client")?;

    let sidecar = GroundingSidecarClient::new(&settings.detector.endpoint, settings.retry_policy())
        .context("failed to construct detector client")?;
    let detector = CueDetector::new(Arc::new(sidecar), settings.filter_config());

    // The throttle is process-wide; every request shares this one instance
    let throttle = Arc::new(GeocodeThrottle::new(settings.geocode_min_interval()));
    let geocoder = NominatimClient::new(&settings.geocode.endpoint, throttle);

    let orchestrator = CueOrchestrator::new(
        Arc::new(hypothesis),
        detector,
        Arc::new(geocoder),
        settings.retry_policy(),
        settings.orchestrator_config(),
    );

    let masking = MaskingEngine::new(settings.mask_config());

    // NER runs when a model is configured; the resolver degrades to the
    // regex bank alone otherwise
    let ner: Option<Arc<dyn NamedEntityRecognizer>> = match (
        settings.ner.model_path.as_deref(),
        settings.ner.tokenizer_path.as_deref(),
    ) {
        (Some(model), Some(tokenizer)) => {
            match OnnxNerModel::new(model, tokenizer, settings.ner.labels.clone()) {
                Ok(model) => {
                    info!("NER model loaded from {}", settings.ner.model_path.as_deref().unwrap_or(""));
                    Some(Arc::new(model))
                }
                Err(e) => {
                    warn!("NER model unavailable, running regex-only: {:#}", e);
                    None
                }
            }
        }
        _ => {
            warn!("no NER model configured, running regex-only");
            None
        }
    };
    let pii = PiiResolver::new(ner);

    let state = AppState::new(Arc::new(orchestrator), Arc::new(masking), Arc::new(pii));

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .context("invalid listen address")?;

    start_server(state, addr)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))?;

    Ok(())
}
