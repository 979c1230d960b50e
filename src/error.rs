//! Host error types
//!
//! Everything that can go wrong while driving modules, moving state between
//! them, or talking to the server.

use thiserror::Error;

/// Errors raised by the host layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A view did not fit inside the module's current linear memory.
    #[error("memory access out of bounds: {len} bytes at offset {offset}, memory is {size} bytes")]
    OutOfBounds {
        /// Requested start offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Memory size at the time of the request.
        size: usize,
    },

    /// Copy between two regions of different length.
    #[error("length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Length of the destination.
        expected: usize,
        /// Length of the source.
        actual: usize,
    },

    /// Save blob does not match the module's declared save size.
    #[error("save blob is {actual} bytes, module expects {expected}")]
    SaveSizeMismatch {
        /// `saveSize()` of the receiving module.
        expected: usize,
        /// Length of the offered blob.
        actual: usize,
    },

    /// Ball buffer is not a whole number of balls, or too short for the count.
    #[error("ball buffer of {byte_len} bytes cannot hold {num_balls} balls")]
    BallLayoutMismatch {
        /// Byte length of the buffer.
        byte_len: usize,
        /// Ball count the caller claimed.
        num_balls: usize,
    },

    /// More balls than the chamber was initialized for.
    #[error("chamber holds {capacity} balls, {requested} requested")]
    BallCapacityExceeded {
        /// Ball capacity from `init`.
        capacity: usize,
        /// Requested ball count.
        requested: usize,
    },

    /// Render resolution exceeds the pixel buffer reserved at init.
    #[error("canvas of {pixels} pixels exceeds chamber maximum of {max}")]
    CanvasTooLarge {
        /// Requested pixel count.
        pixels: usize,
        /// Pixel capacity from `init`.
        max: usize,
    },

    /// `init` called twice on one chamber.
    #[error("chamber already initialized")]
    AlreadyInitialized,

    /// Chamber used before `init`.
    #[error("chamber used before init")]
    NotInitialized,

    /// A transfer was issued while the chamber was already in use.
    #[error("chamber is busy")]
    ChamberBusy,

    /// The physics state blob ran to the end of memory without a NUL.
    #[error("state blob has no NUL terminator")]
    UnterminatedState,

    /// The physics state blob is not the expected JSON.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A required export is absent from the module.
    #[error("module is missing export `{0}`")]
    MissingExport(String),

    /// A module call trapped or threw.
    #[error("module call failed: {0}")]
    Module(String),

    /// Fetching a snapshot, init info or module binary failed.
    #[error("network error: {0}")]
    Network(String),

    /// A populated slot refers to a chamber absent from the snapshot.
    #[error("no chamber with id {0} in snapshot")]
    UnknownChamber(usize),
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        HostError::InvalidState(err.to_string())
    }
}

#[cfg(target_arch = "wasm32")]
impl From<wasm_bindgen::JsValue> for HostError {
    fn from(value: wasm_bindgen::JsValue) -> Self {
        HostError::Module(format!("{:?}", value))
    }
}
