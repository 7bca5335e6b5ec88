//! Sign server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::TimestampPrecision;
use sign_server::{
    config::{DecisionConfig, ServerConfig},
    data_socket::spawn_data_socket,
    endpoints::router,
    engine::Engine,
    meter::spawn_meter_logger,
    nn::OnnxSignClassifier,
    provision::{default_cache_dir, provision_model},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve HTTP on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address of the clip socket
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// JSON file with model and decision settings
    #[clap(long, default_value = "sign_server/config/greetings.json")]
    config: PathBuf,

    /// Directory for downloaded models
    #[clap(long)]
    cache_dir: Option<PathBuf>,

    /// Largest accepted upload in MiB
    #[clap(long, default_value_t = 64)]
    max_upload_mb: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    // Validate the decision config before spending time on the model
    let config = ServerConfig::from_path(&args.config)?;
    let decision_config = DecisionConfig::try_from(config.decision)?;

    let cache_dir = args.cache_dir.unwrap_or_else(default_cache_dir);
    let model_path = provision_model(&config.model.source, &cache_dir)
        .await
        .context("model unavailable")?;
    log::info!("Loading model {}", model_path.display());
    let classifier = OnnxSignClassifier::new(&model_path, &config.model)?;

    let engine = Arc::new(Engine::new(Arc::new(classifier), decision_config));

    // Create socket to receive clips frame by frame
    spawn_data_socket(Arc::clone(&engine), &args.socket_address).await?;

    spawn_meter_logger();

    // Build HTTP server with endpoints
    let app = router(engine, args.max_upload_mb * 1024 * 1024);

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving HTTP on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
