//! Reading clips from disk.
//!
use std::{fs::File, io::BufReader, path::Path};

use sign_server::source::MjpegReader;

use crate::Error;

/// HTTP endpoint matching an upload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Endpoint {
    Image,
    Video,
}

impl Endpoint {
    /// Pick the endpoint from the file extension. Still images go to the image endpoint,
    /// everything else is treated as an MJPEG clip.
    pub fn for_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("jpg" | "jpeg" | "png") => Endpoint::Image,
            _ => Endpoint::Video,
        }
    }

    pub fn route(&self) -> &'static str {
        match self {
            Endpoint::Image => "predict_image",
            Endpoint::Video => "predict_video",
        }
    }
}

/// Split an MJPEG file into its JPEG frames.
pub fn read_frames(path: &Path) -> Result<Vec<Vec<u8>>, Error> {
    let file = File::open(path)?;
    let frames = MjpegReader::new(BufReader::new(file)).collect::<Result<Vec<_>, _>>()?;
    log::debug!("Read {} frames from {}", frames.len(), path.display());
    Ok(frames)
}
