// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU buffers and the three ways to map them.

Mapping is asynchronous in the driver: a request completes through a callback
that fires while the device is ticked. [`Buffer`] presents that as

* a blocking call ([`Buffer::map_read`]),
* a call taking a continuation ([`Buffer::map_read_then`], [`Buffer::map_write_then`]),
* an `async fn` ([`Buffer::map_read_async`], [`Buffer::map_write_async`]).

All of them tick the device themselves until the request completes or the
configured map timeout passes.

```
# test_executors::spin_on(async {
use host_gpu::EntryPoint;
use host_gpu::descriptors::{BufferDescriptor, BufferUsage};

let entry_point = EntryPoint::software();
let adapter = entry_point.request_adapter(&Default::default()).await.unwrap();
let device = adapter.request_device(&Default::default()).await.unwrap();
let buffer = device
    .create_buffer(&BufferDescriptor::new(4, BufferUsage::MAP_READ | BufferUsage::COPY_DST))
    .unwrap();
device.queue().write_buffer(&buffer, 0, &[1, 2, 3, 4]);
let view = buffer.map_read().unwrap();
assert_eq!(view.to_vec().unwrap(), vec![1, 2, 3, 4]);
buffer.unmap();
assert!(view.is_detached());
# });
```
*/

use crate::config::BridgeConfig;
use crate::descriptors::{BufferDescriptor, BufferUsage, HostDescriptor};
use crate::error::Error;
use crate::host::{HostClass, HostValue, expect_object};
use crate::imp::{BufferHandle, Driver, MapMode};
use crate::mapping::{MapOutcome, MapSlot, MappedView, MappedViewRegistry};
use crate::objects::Device;
use crate::ownership::Owned;
use crate::sys::sync::lock;
use std::sync::{Arc, Mutex};

/// Where a buffer is in its mapping lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapState {
    Unmapped,
    /// A map request is outstanding.
    Pending,
    Mapped(MapMode),
    Destroyed,
}

#[derive(Debug)]
enum Mapping {
    Unmapped,
    Pending { slot: Arc<MapSlot>, mode: MapMode },
    Mapped(MapMode),
    /// Views are being detached; the driver has not been told yet.
    Unmapping(MapState),
    Destroyed,
}

#[derive(Debug)]
struct BufferState {
    mapping: Mapping,
    views: MappedViewRegistry,
}

#[derive(Debug)]
struct BufferInner {
    native: Owned<BufferHandle>,
    device: Device,
    descriptor: BufferDescriptor,
    state: Mutex<BufferState>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        //runs before `native` is released
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let detached = state.views.detach_all();
        if detached > 0 {
            logwise::trace_sync!("detached {n} views of a dropped buffer", n = detached);
        }
    }
}

/// A GPU buffer.
#[derive(Debug, Clone)]
pub struct Buffer(Arc<BufferInner>);

impl Buffer {
    /// Creates the buffer; returns its view too when the driver mapped it at creation.
    pub(crate) fn new(
        device: &Device,
        descriptor: &BufferDescriptor,
    ) -> Result<(Self, Option<MappedView>), Error> {
        let driver = device.driver().clone();
        let (handle, mapping) = driver.create_buffer(device.native_handle(), descriptor)?;
        let native = Owned::new(handle, driver);
        let mut state = BufferState {
            mapping: Mapping::Unmapped,
            views: MappedViewRegistry::default(),
        };
        let view = mapping.map(|mapping| {
            let view = MappedView::new(MapMode::Write, mapping);
            state.views.register(view.clone());
            state.mapping = Mapping::Mapped(MapMode::Write);
            view
        });
        Ok((
            Buffer(Arc::new(BufferInner {
                native,
                device: device.clone(),
                descriptor: descriptor.clone(),
                state: Mutex::new(state),
            })),
            view,
        ))
    }

    /// Creates a buffer from host arguments.
    ///
    /// `device` must be a `GPUDevice`; this is checked before the descriptor
    /// is decoded or the driver is called.
    pub fn from_host(device: &HostValue, descriptor: &HostValue) -> Result<Self, Error> {
        let device = expect_object::<Device>(device, "GPUBuffer: argument 0")?;
        device.create_buffer_from_host(descriptor)
    }

    pub fn device(&self) -> &Device {
        &self.0.device
    }

    pub fn size(&self) -> u64 {
        self.0.descriptor.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.0.descriptor.usage
    }

    pub fn label(&self) -> Option<&str> {
        self.0.descriptor.label.as_deref()
    }

    pub fn native_handle(&self) -> BufferHandle {
        self.0.native.handle()
    }

    /// What the driver reports about this buffer.
    pub fn descriptor(&self) -> Option<BufferDescriptor> {
        self.driver().describe_buffer(self.native_handle())
    }

    pub fn map_state(&self) -> MapState {
        match lock(&self.0.state).mapping {
            Mapping::Unmapped => MapState::Unmapped,
            Mapping::Pending { .. } => MapState::Pending,
            Mapping::Mapped(mode) => MapState::Mapped(mode),
            Mapping::Unmapping(previous) => previous,
            Mapping::Destroyed => MapState::Destroyed,
        }
    }

    /// Views handed out since the buffer was last unmapped.
    pub fn mapped_views(&self) -> Vec<MappedView> {
        lock(&self.0.state).views.views().to_vec()
    }

    pub fn mapped_view_count(&self) -> usize {
        lock(&self.0.state).views.len()
    }

    /// Uploads `data` at `offset`. Invalid uploads go to the device's error subscriber.
    pub fn set_sub_data(&self, offset: u64, data: &[u8]) {
        self.driver()
            .buffer_set_sub_data(self.native_handle(), offset, data);
    }

    /// Maps the buffer for reading, blocking until the driver completes the request.
    pub fn map_read(&self) -> Result<MappedView, Error> {
        self.map_blocking(MapMode::Read)
    }

    /// Maps the buffer for reading, then hands the view to `continuation`.
    ///
    /// `continuation` runs exactly once, before this returns, with no internal
    /// lock held.
    pub fn map_read_then<R>(&self, continuation: impl FnOnce(MappedView) -> R) -> Result<R, Error> {
        self.map_blocking(MapMode::Read).map(continuation)
    }

    pub async fn map_read_async(&self) -> Result<MappedView, Error> {
        self.map_async(MapMode::Read).await
    }

    /// Maps the buffer for writing, then hands the view to `continuation`.
    ///
    /// Changes written through the view reach the buffer when it is unmapped.
    pub fn map_write_then<R>(&self, continuation: impl FnOnce(MappedView) -> R) -> Result<R, Error> {
        self.map_blocking(MapMode::Write).map(continuation)
    }

    pub async fn map_write_async(&self) -> Result<MappedView, Error> {
        self.map_async(MapMode::Write).await
    }

    /// Unmaps the buffer.
    ///
    /// Every view handed out is detached first. An outstanding map request is
    /// aborted; this is the only way to cancel one.
    pub fn unmap(&self) {
        let mut state = lock(&self.0.state);
        let previous = match state.mapping {
            Mapping::Pending { .. } => MapState::Pending,
            Mapping::Mapped(mode) => MapState::Mapped(mode),
            Mapping::Unmapping(_) | Mapping::Unmapped | Mapping::Destroyed => return,
        };
        state.mapping = Mapping::Unmapping(previous);
        let mut views = std::mem::take(&mut state.views);
        drop(state);
        //a view's closure may query this buffer, so views are detached without `state` held
        let detached = views.detach_all();
        logwise::trace_sync!("unmap detached {n} views", n = detached);
        self.driver().buffer_unmap(self.native_handle());
        let mut state = lock(&self.0.state);
        if matches!(state.mapping, Mapping::Unmapping(_)) {
            state.mapping = Mapping::Unmapped;
        }
    }

    /// Destroys the buffer's storage. Views are detached; later map requests fail.
    pub fn destroy(&self) {
        let mut state = lock(&self.0.state);
        if matches!(state.mapping, Mapping::Destroyed) {
            return;
        }
        state.mapping = Mapping::Destroyed;
        let mut views = std::mem::take(&mut state.views);
        drop(state);
        views.detach_all();
        self.driver().buffer_destroy(self.native_handle());
    }

    fn map_blocking(&self, mode: MapMode) -> Result<MappedView, Error> {
        let slot = self.begin_map(mode)?;
        let device = &self.0.device;
        let outcome = slot.wait_blocking(|| device.tick(), self.config())?;
        self.finish_map(&slot, mode, outcome)
    }

    async fn map_async(&self, mode: MapMode) -> Result<MappedView, Error> {
        let slot = self.begin_map(mode)?;
        let device = &self.0.device;
        let outcome = slot.wait_async(|| device.tick(), self.config()).await?;
        self.finish_map(&slot, mode, outcome)
    }

    fn begin_map(&self, mode: MapMode) -> Result<Arc<MapSlot>, Error> {
        let mut state = lock(&self.0.state);
        match state.mapping {
            Mapping::Unmapped => {}
            Mapping::Pending { .. } | Mapping::Unmapping(MapState::Pending) => return Err(Error::MapPending),
            Mapping::Mapped(_) | Mapping::Unmapping(_) => return Err(Error::AlreadyMapped),
            Mapping::Destroyed => return Err(Error::Destroyed),
        }
        let slot = MapSlot::new();
        state.mapping = Mapping::Pending {
            slot: slot.clone(),
            mode,
        };
        drop(state);
        logwise::trace_sync!(
            "map request on buffer {id} for {mode}",
            id = self.native_handle().raw().get(),
            mode = logwise::privacy::LogIt(&mode)
        );
        self.driver()
            .buffer_map_async(self.native_handle(), mode, slot.callback());
        Ok(slot)
    }

    fn finish_map(&self, slot: &Arc<MapSlot>, mode: MapMode, outcome: MapOutcome) -> Result<MappedView, Error> {
        let mut state = lock(&self.0.state);
        let current = matches!(&state.mapping, Mapping::Pending { slot: pending, .. } if Arc::ptr_eq(pending, slot));
        if !current {
            //unmapped or destroyed while we waited
            return Err(match state.mapping {
                Mapping::Destroyed => Error::Destroyed,
                _ => Error::MapFailed(crate::imp::MapAsyncStatus::Aborted),
            });
        }
        match outcome {
            Ok(mapping) => {
                let view = MappedView::new(mode, mapping);
                state.views.register(view.clone());
                state.mapping = Mapping::Mapped(mode);
                Ok(view)
            }
            Err(status) => {
                state.mapping = Mapping::Unmapped;
                Err(Error::MapFailed(status))
            }
        }
    }

    fn driver(&self) -> &Arc<dyn Driver> {
        self.0.native.driver()
    }

    fn config(&self) -> &BridgeConfig {
        self.0.device.config()
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl HostClass for Buffer {
    const CLASS_NAME: &'static str = "GPUBuffer";
}
