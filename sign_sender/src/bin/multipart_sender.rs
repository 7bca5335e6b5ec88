use std::path::PathBuf;

use clap::Parser;
use common::decision::{DecisionResponse, ErrorResponse};
use env_logger::TimestampPrecision;
use reqwest::multipart;
use sign_sender::{clip::Endpoint, Error};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the sign server to connect to
    #[clap(long, default_value = "127.0.0.1:3000")]
    address: String,

    /// Image or MJPEG clip to classify
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let endpoint = Endpoint::for_path(&args.file);
    log::info!("Uploading {} to /{}", args.file.display(), endpoint.route());

    let data = tokio::fs::read(&args.file).await?;
    let file_name = args
        .file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into());
    let form = multipart::Form::new().part("file", multipart::Part::bytes(data).file_name(file_name));

    let response = reqwest::Client::new()
        .post(&format!("http://{}/{}", &args.address, endpoint.route()))
        .multipart(form)
        .send()
        .await?;

    if response.status().is_success() {
        let decision: DecisionResponse = response.json().await?;
        println!("{:?} after {} frames: {:?}", decision.data.reason, decision.data.frames_processed, decision.data.labels);
    } else {
        let status = response.status();
        let error: ErrorResponse = response.json().await?;
        log::error!("Server answered {} ({}): {}", status, error.error_code, error.error);
    }

    Ok(())
}
