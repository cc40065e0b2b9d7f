// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Conversions from wgpu's errors.

use crate::errors::ErrorCategory;
use crate::imp::Error;

impl From<wgpu::RequestAdapterError> for Error {
    fn from(e: wgpu::RequestAdapterError) -> Self {
        logwise::warn_sync!("adapter request failed: {err}", err = logwise::privacy::LogIt(&e));
        Error::NoSuchAdapter
    }
}

impl From<wgpu::RequestDeviceError> for Error {
    fn from(e: wgpu::RequestDeviceError) -> Self {
        Error::Backend(format!("device request failed: {e}"))
    }
}

impl From<wgpu::CreateSurfaceError> for Error {
    fn from(e: wgpu::CreateSurfaceError) -> Self {
        Error::Backend(format!("surface creation failed: {e}"))
    }
}

impl From<wgpu::SurfaceError> for Error {
    fn from(e: wgpu::SurfaceError) -> Self {
        Error::Backend(format!("frame acquisition failed: {e}"))
    }
}

/// Sorts an uncaptured wgpu error into the category subscribers see.
pub(super) fn categorize(error: &wgpu::Error) -> (ErrorCategory, String) {
    match error {
        wgpu::Error::Validation { description, .. } => (ErrorCategory::Validation, description.clone()),
        wgpu::Error::OutOfMemory { .. } => (ErrorCategory::OutOfMemory, error.to_string()),
        wgpu::Error::Internal { description, .. } => (ErrorCategory::Unknown, description.clone()),
        #[allow(unreachable_patterns)]
        _ => (ErrorCategory::Unknown, error.to_string()),
    }
}
