pub mod hyprctl;
pub mod socket;
pub mod types;

pub use self::types::{Display, Geometry, changes_needed};

use std::io;
use thiserror::Error;

const UNKNOWN_REQUEST: &str = "unknown request";

#[derive(Debug, Error)]
pub enum CompositorError {
    /// The compositor understood the transport but not the request.
    #[error("compositor replied: unknown request")]
    UnknownRequest,
    #[error("compositor command failed: {0}")]
    Command(String),
    #[error("running compositor binary: {0}")]
    Io(#[from] io::Error),
    #[error("decoding compositor reply: {0}")]
    Json(#[from] serde_json::Error),
}

/// The operations the daemon needs from the compositor.
#[allow(async_fn_in_trait)]
pub trait Compositor {
    async fn list_displays(&self) -> Result<Vec<Display>, CompositorError>;

    async fn enable_or_update(&self, display: &Display) -> Result<(), CompositorError>;

    async fn disable(&self, display: &Display) -> Result<(), CompositorError>;
}

/// Maps a raw compositor reply to an error when it signals a rejected
/// request.
pub fn check_reply(reply: &str) -> Result<(), CompositorError> {
    match reply.trim() {
        UNKNOWN_REQUEST => Err(CompositorError::UnknownRequest),
        _ => Ok(()),
    }
}
