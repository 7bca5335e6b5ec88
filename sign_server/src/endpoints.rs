//! Endpoints of HTTP server.
//!
use std::{io::Cursor, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Multipart},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use common::decision::DecisionResponse;
use tokio_util::sync::CancellationToken;

use crate::{
    engine::Engine,
    error::{Error, Result},
    source::{decode_image, MjpegSource},
};

/// Multipart field carrying the upload.
const UPLOAD_FIELD: &str = "file";

/// HTTP routes of the sign server, sharing one engine.
pub fn router(engine: Arc<Engine>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/predict_image", post(predict_image))
        .route("/predict_video", post(predict_video))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(Extension(engine))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Classify a single uploaded image.
pub async fn predict_image(
    Extension(engine): Extension<Arc<Engine>>,
    multipart: Multipart,
) -> Result<Json<DecisionResponse>> {
    let upload = read_upload(multipart).await?;
    log::info!("Image upload of {} bytes", upload.len());

    let image = decode_image(&upload)
        .map_err(|e| Error::SourceUnavailable(format!("cannot decode image: {e}")))?;

    let data = tokio::task::spawn_blocking(move || engine.classify_image(&image)).await?;

    Ok(Json(DecisionResponse { data }))
}

/// Classify an uploaded MJPEG clip.
///
/// The clip is processed on a blocking thread. If the client goes away the request future is
/// dropped, which cancels the frame loop.
pub async fn predict_video(
    Extension(engine): Extension<Arc<Engine>>,
    multipart: Multipart,
) -> Result<Json<DecisionResponse>> {
    let upload = read_upload(multipart).await?;
    log::info!("Video upload of {} bytes", upload.len());

    let source = MjpegSource::new(Cursor::new(upload))?;

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let data =
        tokio::task::spawn_blocking(move || engine.classify_stream(source, &cancel)).await?;

    Ok(Json(DecisionResponse { data }))
}

async fn read_upload(mut multipart: Multipart) -> Result<Bytes> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some(UPLOAD_FIELD) {
            return field
                .bytes()
                .await
                .map_err(|e| Error::BadRequest(format!("failed to read upload: {e}")));
        }
        log::debug!("Skipping multipart field {:?}", field.name());
    }

    Err(Error::BadRequest("no file provided".into()))
}
