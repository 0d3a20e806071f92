use std::path::PathBuf;

use thiserror::Error;

/// Library errors.
///
/// The real-time path clamps or ignores bad input instead of failing. The
/// one variant it can produce is [`Error::NoFreeLoop`], which carries no
/// allocation.
#[derive(Error, Debug)]
pub enum Error {
    /// Loop buffers could not be sized for the requested sample rate.
    #[error("cannot allocate loop buffers: {0}")]
    Capacity(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("malformed session state: {0}")]
    State(#[from] serde_json::Error),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("wav export failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("no track with id {0}")]
    UnknownTrack(u32),

    #[error("track id {0} appears twice in the session state")]
    DuplicateTrack(u32),

    /// The track has no spare loop buffer, or its loop list is full.
    #[error("track {0} has no free loop to record into")]
    NoFreeLoop(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
