//! Error type for the fallible edges of the engine.
//!
//! Detection and tick processing never fail: degraded inputs are absorbed and
//! reported through counters and logs. Only configuration loading and the
//! construction of externally supplied frames can produce an `OverlayError`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    /// I/O errors while reading configuration files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML or does not match the schema.
    #[error("Configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value is outside its accepted range.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A depth frame whose sample buffer does not match its declared resolution.
    #[error("Depth frame error: expected {expected} samples for a {width}x{height} eye, got {actual}")]
    DepthFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    /// The pipeline side of the inbox has been dropped.
    #[error("Inbox closed: the pipeline is no longer receiving")]
    InboxClosed,
}

pub type Result<T> = std::result::Result<T, OverlayError>;
