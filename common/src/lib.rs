//! Common code shared between `sign_server` and `sign_sender`.
pub mod decision;
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
