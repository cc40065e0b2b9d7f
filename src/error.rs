// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Errors surfaced synchronously at the wrapper boundary.
//!
//! Native runtime errors (validation, out-of-memory, device loss) are *not*
//! represented here; they arrive out-of-band through
//! [`Device::on_uncaptured_error`](crate::objects::Device::on_uncaptured_error).

use crate::imp::MapAsyncStatus;
use std::time::Duration;

/// Platform-independent error type for every fallible wrapper operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A host argument was not an instance of the expected class.
    #[error("{context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: &'static str,
        found: String,
    },
    /// A descriptor could not be decoded from its host representation.
    #[error("{path}: {message}")]
    Decode { path: String, message: String },
    /// The native driver refused the request outright.
    #[error(transparent)]
    Driver(#[from] crate::imp::Error),
    /// A map request is already outstanding on this buffer.
    #[error("buffer already has a map request outstanding")]
    MapPending,
    /// The buffer is mapped; it must be unmapped before it is mapped again.
    #[error("buffer is already mapped")]
    AlreadyMapped,
    /// The buffer was destroyed.
    #[error("buffer has been destroyed")]
    Destroyed,
    /// The native driver completed the map request with a failure status.
    #[error("map request failed: {0}")]
    MapFailed(MapAsyncStatus),
    /// The native driver did not complete the map request in time.
    ///
    /// The request stays outstanding until the buffer is unmapped.
    #[error("map request did not complete within {0:?}")]
    MapTimeout(Duration),
    /// The view was detached by an unmap or destroy of its buffer.
    #[error("mapped view has been detached")]
    Detached,
    /// Write access was requested through a view mapped for reading.
    #[error("mapped view is read-only")]
    ReadOnlyView,
    /// An access fell outside the view.
    #[error("range {offset}..{end} is outside a view of {len} bytes")]
    OutOfBounds { offset: usize, end: usize, len: usize },
    /// The window handles for a canvas could not be obtained.
    #[error(transparent)]
    WindowHandle(#[from] raw_window_handle::HandleError),
}

impl Error {
    pub(crate) fn decode(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Decode {
            path: path.into(),
            message: message.into(),
        }
    }
}
