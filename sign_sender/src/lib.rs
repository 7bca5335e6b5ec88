//! Sends clips and images to the sign server.
pub mod clip;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
