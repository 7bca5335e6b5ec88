//! Sign-language recognition over images and clips.
//!
//! A classifier produces noisy per-frame detections; the engine in this crate turns a stream
//! of them into one decision per request.
pub mod config;
pub mod data_socket;
pub mod decision;
pub mod detection;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod meter;
pub mod nn;
pub mod normalize;
pub mod policy;
pub mod provision;
pub mod source;

pub use error::{Error, Result};
