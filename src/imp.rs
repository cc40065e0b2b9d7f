// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The native driver seam.
//!
//! Everything above this module is wrapper code: it decodes descriptors, holds
//! parent references and bridges callbacks. Everything below it is "native":
//! the [`Driver`] trait speaks in opaque handles and plain descriptors, and its
//! asynchronous operations complete through callbacks that only fire while the
//! owning device is ticked.

use crate::config::BackendKind;
use crate::descriptors::{
    AccelerationContainerFlags, AccelerationContainerLevel, AdapterOptions, BufferDescriptor,
    DeviceDescriptor, IndexFormat, InstanceFlags, TextureDescriptor, TextureFormat, TextureUsage,
    Transform, VertexFormat,
};
use crate::errors::ErrorCategory;
use crate::objects::SurfaceTarget;
use std::fmt::{Debug, Display, Formatter};
use std::ptr::NonNull;
use std::sync::Arc;

mod handle;
pub mod soft;
#[cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]
mod wgpu;

pub use handle::{
    AccelerationContainerHandle, AdapterHandle, BufferHandle, DeviceHandle, SwapChainHandle,
    TextureHandle,
};

/// Errors a driver returns synchronously from creation calls.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("no adapter matches the requested options")]
    NoSuchAdapter,
    #[error("the {0} backend is not compiled into this build")]
    BackendUnavailable(&'static str),
    #[error("{feature} is not supported by the {backend} backend")]
    Unsupported {
        feature: &'static str,
        backend: &'static str,
    },
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("{0}")]
    Backend(String),
}

/// Direction of a buffer mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    Read,
    Write,
}

/// Why a map request completed without a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapAsyncStatus {
    /// The driver rejected the request (bad usage, already mapped, ...).
    Error,
    /// The buffer was unmapped before the request completed.
    Aborted,
    /// The buffer was destroyed or released before the request completed.
    DestroyedBeforeCallback,
    /// The device was lost before the request completed.
    DeviceLost,
}

impl Display for MapAsyncStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MapAsyncStatus::Error => write!(f, "rejected by the driver"),
            MapAsyncStatus::Aborted => write!(f, "unmapped before completion"),
            MapAsyncStatus::DestroyedBeforeCallback => write!(f, "buffer destroyed before completion"),
            MapAsyncStatus::DeviceLost => write!(f, "device lost"),
        }
    }
}

/// A region of driver-owned memory made visible by a completed map request.
///
/// The wrapper exposes it to callers without copying.
#[derive(Debug)]
pub struct NativeMapping {
    ptr: NonNull<u8>,
    len: usize,
}

//the region is only touched through the view lock, and the driver does not
//touch it while mapped
unsafe impl Send for NativeMapping {}

impl NativeMapping {
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes until the driver
    /// unmaps, destroys or releases the buffer the region belongs to, and the
    /// driver must not access the region itself in that time.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        NativeMapping { ptr, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Safety
    /// The mapping must still be live (see [`NativeMapping::new`]).
    pub(crate) unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// # Safety
    /// The mapping must still be live (see [`NativeMapping::new`]).
    pub(crate) unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

/// Completion of a map request. Fires exactly once per request.
pub type MapCallback = Box<dyn FnOnce(Result<NativeMapping, MapAsyncStatus>) + Send>;
/// Completion of previously submitted queue work.
pub type WorkDoneCallback = Box<dyn FnOnce() + Send>;
/// Receiver for errors the driver cannot attribute to a returning call.
pub type UncapturedErrorCallback = Arc<dyn Fn(ErrorCategory, &str) + Send + Sync>;

/// What the driver reports about an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub backend: String,
    pub is_fallback: bool,
}

/// Swap chain configuration as the driver sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeSwapChainDescriptor {
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

/// One triangle geometry of a bottom-level acceleration container.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeGeometry {
    pub vertex_buffer: BufferHandle,
    pub vertex_format: VertexFormat,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub index: Option<NativeIndexData>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeIndexData {
    pub buffer: BufferHandle,
    pub format: IndexFormat,
    pub count: u32,
}

/// One instance of a top-level acceleration container.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeInstance {
    pub geometry_container: AccelerationContainerHandle,
    pub flags: InstanceFlags,
    pub mask: u8,
    pub instance_id: u32,
    pub instance_offset: u32,
    pub transform: Transform,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NativeAccelerationContainerDescriptor {
    pub level: AccelerationContainerLevel,
    pub flags: AccelerationContainerFlags,
    pub geometries: Vec<NativeGeometry>,
    pub instances: Vec<NativeInstance>,
}

/// A native GPU driver.
///
/// Creation calls that the driver can refuse outright return `Err`. Everything
/// else follows WebGPU conventions: invalid usage is reported to the device's
/// uncaptured-error callback and the call returns normally. Callbacks passed to
/// the driver fire only from inside [`Driver::device_tick`] (or from unmap,
/// destroy and release calls, which complete anything outstanding), never
/// while the driver holds its own locks.
///
/// Every handle a `create_*`/`request_*` call returns must eventually be passed
/// to the matching `release_*` call exactly once.
pub trait Driver: Send + Sync + Debug {
    fn backend_name(&self) -> &'static str;

    fn request_adapter(&self, options: &AdapterOptions) -> Result<AdapterHandle, Error>;
    fn adapter_info(&self, adapter: AdapterHandle) -> Result<AdapterInfo, Error>;
    fn release_adapter(&self, adapter: AdapterHandle);

    fn create_device(
        &self,
        adapter: AdapterHandle,
        descriptor: &DeviceDescriptor,
    ) -> Result<DeviceHandle, Error>;
    /// Installs (or with `None`, removes) the device's single error callback.
    fn set_uncaptured_error_callback(
        &self,
        device: DeviceHandle,
        callback: Option<UncapturedErrorCallback>,
    );
    /// Pumps the device's internal queue; completed callbacks fire from here.
    fn device_tick(&self, device: DeviceHandle);
    fn queue_on_submitted_work_done(&self, device: DeviceHandle, callback: WorkDoneCallback);
    fn release_device(&self, device: DeviceHandle);

    /// Creates a buffer; returns its mapping when `mapped_at_creation` was honored.
    fn create_buffer(
        &self,
        device: DeviceHandle,
        descriptor: &BufferDescriptor,
    ) -> Result<(BufferHandle, Option<NativeMapping>), Error>;
    fn describe_buffer(&self, buffer: BufferHandle) -> Option<BufferDescriptor>;
    fn buffer_set_sub_data(&self, buffer: BufferHandle, offset: u64, data: &[u8]);
    fn buffer_map_async(&self, buffer: BufferHandle, mode: MapMode, callback: MapCallback);
    /// Unmaps the buffer. An outstanding map request completes with [`MapAsyncStatus::Aborted`].
    fn buffer_unmap(&self, buffer: BufferHandle);
    /// Frees the buffer's storage; the handle stays valid until released.
    fn buffer_destroy(&self, buffer: BufferHandle);
    fn release_buffer(&self, buffer: BufferHandle);

    fn create_texture(
        &self,
        device: DeviceHandle,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, Error>;
    fn describe_texture(&self, texture: TextureHandle) -> Option<TextureDescriptor>;
    fn texture_destroy(&self, texture: TextureHandle);
    fn release_texture(&self, texture: TextureHandle);

    fn preferred_swap_chain_format(&self, device: DeviceHandle) -> Result<TextureFormat, Error>;
    fn create_swap_chain(
        &self,
        device: DeviceHandle,
        surface: &SurfaceTarget,
        descriptor: &NativeSwapChainDescriptor,
    ) -> Result<SwapChainHandle, Error>;
    /// Acquires the texture for the current frame. The caller owns (and must release) it.
    fn swap_chain_current_texture(&self, swap_chain: SwapChainHandle) -> Result<TextureHandle, Error>;
    fn swap_chain_present(&self, swap_chain: SwapChainHandle);
    fn release_swap_chain(&self, swap_chain: SwapChainHandle);

    fn create_acceleration_container(
        &self,
        device: DeviceHandle,
        descriptor: &NativeAccelerationContainerDescriptor,
    ) -> Result<AccelerationContainerHandle, Error>;
    fn release_acceleration_container(&self, container: AccelerationContainerHandle);
}

/// Instantiates the driver for `backend`.
pub(crate) fn driver_for(backend: BackendKind) -> Result<Arc<dyn Driver>, Error> {
    match backend {
        BackendKind::Software => Ok(Arc::new(soft::SoftDriver::new())),
        #[cfg(all(feature = "backend_wgpu", not(target_arch = "wasm32")))]
        BackendKind::Wgpu => Ok(Arc::new(wgpu::WgpuDriver::new())),
        #[cfg(not(all(feature = "backend_wgpu", not(target_arch = "wasm32"))))]
        BackendKind::Wgpu => Err(Error::BackendUnavailable("wgpu")),
    }
}
