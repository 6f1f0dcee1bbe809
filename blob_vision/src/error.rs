// THEORY:
// The `error` module defines the single error vocabulary shared by every layer of
// the blob engine. The detection core itself is infallible once a frame has been
// validated; every failure it can report happens at the boundary (bad geometry, a
// short buffer, a handle that does not exist) before any pixel is touched.
// The outer layers (file I/O, configuration, the worker pool) fold their own
// failures into the same enum so callers only ever match on `BlobError`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type BlobResult<T> = Result<T, BlobError>;

#[derive(Debug, Error)]
pub enum BlobError {
    /// Frame dimensions that cannot describe a 4:2:0 image with 16-bit coordinates.
    #[error("invalid frame geometry {cols}x{rows}: {reason}")]
    InvalidGeometry {
        cols: usize,
        rows: usize,
        reason: &'static str,
    },
    #[error("buffer holds {actual} bytes but {required} are required")]
    BufferTooSmall { required: usize, actual: usize },
    /// A blob-set handle outside the entries handed out for the current frame.
    #[error("blob-set handle {handle} is out of range ({used} entries in use)")]
    InvalidHandle { handle: u16, used: usize },
    #[error("blob-set handle {handle} is not a live root")]
    NotARoot { handle: u16 },
    #[error("run {low}..{high} covers no pixels")]
    EmptyRun { low: u16, high: u16 },
    #[error("failed to preallocate {entries} {what} entries")]
    Allocation { what: &'static str, entries: usize },
    #[error("invalid .yuv header: {reason}")]
    InvalidHeader { reason: String },
    #[error("worker pool is no longer accepting frames")]
    PoolClosed,
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BlobError {
    pub(crate) fn geometry(cols: usize, rows: usize, reason: &'static str) -> Self {
        Self::InvalidGeometry { cols, rows, reason }
    }

    pub(crate) fn header(reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            reason: reason.into(),
        }
    }
}
