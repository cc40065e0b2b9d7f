// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
host_gpu exposes a WebGPU-style native driver to a dynamic host runtime.

The host holds wrapper objects ([`Adapter`], [`Device`], [`Buffer`], ...); each
wrapper owns exactly one native handle and keeps its parents alive, so native
resources are released once, in child-before-parent order, no matter in what
order the host lets go of them.

| Concern              | Where                                   |
|----------------------|-----------------------------------------|
| Ownership bridge     | wrapper `Drop` releases the native handle |
| Buffer mapping       | blocking, continuation and async forms on [`Buffer`] |
| Mapped views         | [`MappedView`], detached on unmap and destroy |
| Uncaptured errors    | [`Device::on_uncaptured_error`]          |
| Descriptors          | [`descriptors`], decoded from [`host::HostValue`] |
| Presentation         | [`CanvasContext`] and [`SwapChain`]      |
| Ray tracing          | [`AccelerationContainer`]               |

# Backends

The native side sits behind the [`Driver`] trait. Two drivers ship:

* [`SoftDriver`], an in-memory driver that validates like WebGPU and counts every
  handle it mints. Always available.
* a wgpu driver, behind the `backend_wgpu` feature (native targets only).

[`EntryPoint::new`] picks one from the environment; see [`config`].

# Example

```
use host_gpu::descriptors::{AdapterOptions, BufferDescriptor, BufferUsage, DeviceDescriptor};
use host_gpu::EntryPoint;

test_executors::spin_on(async {
    let entry_point = EntryPoint::software();
    let adapter = entry_point.request_adapter(&AdapterOptions::default()).await.unwrap();
    let device = adapter.request_device(&DeviceDescriptor::default()).await.unwrap();
    let (buffer, view) = device
        .create_buffer_mapped(&BufferDescriptor::new(4, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC))
        .unwrap();
    view.copy_from_slice(0, &[1, 2, 3, 4]).unwrap();
    buffer.unmap();
    assert!(view.is_detached());
});
```
*/

pub mod config;
pub mod descriptors;
mod entry_point;
pub mod error;
pub mod errors;
pub mod host;
pub mod imp;
pub mod mapping;
pub mod objects;
mod ownership;
mod sys;

pub use config::{BackendKind, BridgeConfig};
pub use entry_point::{EntryPoint, EntryPointError};
pub use error::Error;
pub use errors::{ErrorCategory, ErrorSubscription};
pub use imp::Error as DriverError;
pub use imp::soft::{HandleStats, KindStats, ResourceKind, SoftDriver, SoftDriverOptions};
pub use imp::{Driver, MapAsyncStatus, MapMode};
pub use mapping::MappedView;
pub use objects::{
    AccelerationContainer, AccelerationContainerDescriptor, Adapter, Buffer, CanvasContext, Device,
    GeometryDescriptor, IndexData, InstanceDescriptor, MapState, Queue, SurfaceTarget, SwapChain,
    SwapChainDescriptor, Texture, WindowHandles,
};
