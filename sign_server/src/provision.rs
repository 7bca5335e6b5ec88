//! Model provisioning.
//!
//! Resolves the configured model source to a local file before the engine starts. Remote
//! models are downloaded once into a cache directory.
use std::{
    fs::{self, File},
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Default cache directory for downloaded models.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("sign_server")
}

/// Return a local path for `source`, downloading it into `cache_dir` if it is a URL.
pub async fn provision_model(source: &str, cache_dir: &Path) -> Result<PathBuf> {
    if !is_remote(source) {
        let path = PathBuf::from(source);
        if !path.is_file() {
            bail!("model file {} does not exist", path.display());
        }
        return Ok(path);
    }

    let filepath = cache_dir.join(cache_file_name(source)?);
    if filepath.is_file() {
        log::info!("Using cached model {}", filepath.display());
        return Ok(filepath);
    }

    fs::create_dir_all(cache_dir)
        .with_context(|| format!("cannot create cache dir {}", cache_dir.display()))?;

    log::info!("Downloading model from {}", source);
    let client = Client::new();
    // Download next to the final file so an interrupted download is never picked up
    let partial = filepath.with_extension("part");
    download_file(&client, source, &partial).await?;
    fs::rename(&partial, &filepath)?;

    Ok(filepath)
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Last path segment of a URL, without query or fragment.
fn cache_file_name(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let without_scheme = path.split_once("://").map_or(path, |(_, rest)| rest);
    match without_scheme.split_once('/') {
        Some((_host, route)) => match route.rsplit('/').next() {
            Some(name) if !name.is_empty() => Ok(name.to_owned()),
            _ => bail!("cannot derive a file name from {url}"),
        },
        None => bail!("cannot derive a file name from {url}"),
    }
}

/// Download a file from a URL to a given filepath.
async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}
