use thiserror::Error;

/// Errors from the object store and the local slide cache.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing key does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Network, credential or protocol failure talking to the object store
    #[error("object store transport error: {0}")]
    Transport(String),

    /// Local filesystem failure while materialising a copy
    #[error("local storage error: {0}")]
    Local(String),
}

/// Errors from the slide decoder wrapper and the handle cache.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// Fetching or caching the source file failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The decoding library could not open the file
    #[error("failed to open slide {path}: {message}")]
    Open { path: String, message: String },

    /// The decoding library reported an error for an open handle
    #[error("decoder error: {0}")]
    Decoder(String),

    /// The handle was closed by the cache before the read could run
    #[error("slide handle closed: {0}")]
    HandleClosed(String),
}

/// Errors surfaced by the tile service, one variant per wire-level kind.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The slide object does not exist in the bucket
    #[error("slide not found: {path}")]
    NotFound { path: String },

    /// Malformed URL, unknown format or a level outside the pyramid
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Decoding library failure or a handle closed mid-read
    #[error("decoder error: {0}")]
    Decoder(String),

    /// Local filesystem or object store transport failure
    #[error("storage error: {0}")]
    Storage(String),

    /// The requested tile maps to an empty or invalid region
    #[error("tile out of bounds: level={level}, col={col}, row={row}: {reason}")]
    OutOfBounds {
        level: u32,
        col: u32,
        row: u32,
        reason: String,
    },
}

impl From<StoreError> for TileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => TileError::NotFound { path },
            StoreError::Transport(msg) | StoreError::Local(msg) => TileError::Storage(msg),
        }
    }
}

impl From<SlideError> for TileError {
    fn from(err: SlideError) -> Self {
        match err {
            SlideError::Store(store) => store.into(),
            SlideError::Open { .. } | SlideError::Decoder(_) | SlideError::HandleClosed(_) => {
                TileError::Decoder(err.to_string())
            }
        }
    }
}
