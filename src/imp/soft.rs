// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
An in-memory software driver.

[`SoftDriver`] implements [`Driver`] without a GPU: buffers are heap
allocations, textures and swap chains are bookkeeping, and asynchronous work
completes on device ticks. It validates its inputs the way a WebGPU
implementation does, reporting invalid usage to the device's error callback
rather than failing the call.

It is also instrumented. Every handle it mints is counted, so tests can check
that each one is released exactly once, and the test hooks
([`SoftDriver::inject_error`], [`SoftDriver::set_complete_maps`], ...) let
tests drive the error and timeout paths.
*/

use crate::descriptors::{
    AccelerationContainerLevel, AdapterOptions, BufferDescriptor, BufferUsage, DeviceDescriptor,
    Extensions, Limits, TextureDescriptor, TextureFormat,
};
use crate::errors::ErrorCategory;
use crate::imp::{
    AccelerationContainerHandle, AdapterHandle, AdapterInfo, BufferHandle, DeviceHandle, Driver,
    Error, MapAsyncStatus, MapCallback, MapMode, NativeAccelerationContainerDescriptor,
    NativeMapping, NativeSwapChainDescriptor, SwapChainHandle, TextureHandle,
    UncapturedErrorCallback, WorkDoneCallback,
};
use crate::objects::SurfaceTarget;
use crate::sys::sync::lock;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU64;
use std::ptr::NonNull;
use std::sync::Mutex;

const BACKEND_NAME: &str = "soft";

/// Behavior knobs for a [`SoftDriver`].
#[derive(Debug, Clone)]
pub struct SoftDriverOptions {
    /// How many device ticks a map request takes to complete (at least one).
    pub map_latency_ticks: u32,
    /// Whether map requests complete at all. With `false` they stay pending
    /// until unmapped, destroyed or released.
    pub complete_maps: bool,
    pub preferred_format: TextureFormat,
    pub adapter_name: String,
    /// Extensions a device may request.
    pub supported_extensions: Extensions,
    /// The largest limits a device may request.
    pub supported_limits: Limits,
}

impl Default for SoftDriverOptions {
    fn default() -> Self {
        SoftDriverOptions {
            map_latency_ticks: 1,
            complete_maps: true,
            preferred_format: TextureFormat::Bgra8Unorm,
            adapter_name: "Software Adapter".to_string(),
            supported_extensions: Extensions {
                anisotropic_filtering: true,
                ray_tracing: true,
            },
            supported_limits: Limits {
                max_bind_groups: 8,
                max_buffer_size: 1 << 30,
                max_texture_dimension_2d: 16384,
                max_uniform_buffer_binding_size: 64 << 10,
            },
        }
    }
}

/// The kinds of handle a [`SoftDriver`] mints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Adapter,
    Device,
    Buffer,
    Texture,
    SwapChain,
    AccelerationContainer,
}

impl ResourceKind {
    const ALL: [ResourceKind; 6] = [
        ResourceKind::Adapter,
        ResourceKind::Device,
        ResourceKind::Buffer,
        ResourceKind::Texture,
        ResourceKind::SwapChain,
        ResourceKind::AccelerationContainer,
    ];
}

/// Handle counters for one [`ResourceKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindStats {
    pub created: u64,
    pub released: u64,
    /// Release calls for a handle that was already released.
    pub double_releases: u64,
}

impl KindStats {
    pub fn live(&self) -> u64 {
        self.created - self.released
    }
}

/// A snapshot of the driver's handle counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleStats {
    kinds: HashMap<ResourceKind, KindStats>,
}

impl HandleStats {
    pub fn kind(&self, kind: ResourceKind) -> KindStats {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }

    /// Handles created and not yet released, across all kinds.
    pub fn live(&self) -> u64 {
        self.kinds.values().map(KindStats::live).sum()
    }

    pub fn double_releases(&self) -> u64 {
        self.kinds.values().map(|k| k.double_releases).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SoftMap {
    Unmapped,
    Pending(MapMode),
    Mapped(MapMode),
}

struct PendingMap {
    buffer: u64,
    mode: MapMode,
    ticks_left: u32,
    /// Set when the request was rejected; it fails on the next tick.
    failure: Option<MapAsyncStatus>,
    callback: MapCallback,
}

struct DeviceEntry {
    descriptor: DeviceDescriptor,
    error_callback: Option<UncapturedErrorCallback>,
    pending_maps: Vec<PendingMap>,
    work_done: Vec<WorkDoneCallback>,
    injected_errors: Vec<(ErrorCategory, String)>,
}

struct BufferEntry {
    device: u64,
    descriptor: BufferDescriptor,
    data: Box<[u8]>,
    map: SoftMap,
    destroyed: bool,
    valid: bool,
}

struct TextureEntry {
    descriptor: TextureDescriptor,
    destroyed: bool,
}

struct SwapChainEntry {
    device: u64,
    descriptor: NativeSwapChainDescriptor,
    width: u32,
    height: u32,
    current: Option<u64>,
    presented: u64,
}

struct ContainerEntry {
    level: AccelerationContainerLevel,
}

type Deferred = Vec<Box<dyn FnOnce() + Send>>;

struct State {
    next_id: u64,
    ticks: u64,
    adapters: HashMap<u64, AdapterInfo>,
    devices: HashMap<u64, DeviceEntry>,
    buffers: HashMap<u64, BufferEntry>,
    textures: HashMap<u64, TextureEntry>,
    swap_chains: HashMap<u64, SwapChainEntry>,
    containers: HashMap<u64, ContainerEntry>,
    released: HashSet<u64>,
    stats: HashMap<ResourceKind, KindStats>,
}

impl State {
    fn mint(&mut self, kind: ResourceKind) -> NonZeroU64 {
        let id = self.next_id;
        self.next_id += 1;
        self.stats.entry(kind).or_default().created += 1;
        //ids start at 1 and only grow
        NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN)
    }

    /// Records a release. Returns false (and counts it) for a handle released before.
    fn note_release(&mut self, kind: ResourceKind, id: u64) -> bool {
        let stats = self.stats.entry(kind).or_default();
        if self.released.insert(id) {
            stats.released += 1;
            true
        } else {
            stats.double_releases += 1;
            logwise::error_sync!(
                "{kind} {id} released twice",
                kind = logwise::privacy::LogIt(&kind),
                id = id
            );
            false
        }
    }

    /// Sends an error to the device's callback once the state lock is dropped.
    fn report(&self, device: u64, category: ErrorCategory, message: String, deferred: &mut Deferred) {
        match self.devices.get(&device).and_then(|d| d.error_callback.clone()) {
            Some(callback) => deferred.push(Box::new(move || callback(category, &message))),
            None => logwise::warn_sync!(
                "soft driver error on device {device} without a callback: {message}",
                device = device,
                message = message
            ),
        }
    }

    /// Fails the buffer's outstanding map request with `status`.
    fn abort_pending_map(&mut self, buffer: u64, status: MapAsyncStatus, deferred: &mut Deferred) {
        let Some(device) = self.buffers.get(&buffer).map(|b| b.device) else {
            return;
        };
        let Some(device) = self.devices.get_mut(&device) else {
            return;
        };
        let (aborted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut device.pending_maps)
            .into_iter()
            .partition(|p| p.buffer == buffer);
        device.pending_maps = kept;
        for pending in aborted {
            let callback = pending.callback;
            deferred.push(Box::new(move || callback(Err(status))));
        }
    }
}

/// The in-memory driver. See the module documentation.
pub struct SoftDriver {
    options: Mutex<SoftDriverOptions>,
    state: Mutex<State>,
}

impl Debug for SoftDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("SoftDriver")
            .field("ticks", &state.ticks)
            .field("devices", &state.devices.len())
            .field("buffers", &state.buffers.len())
            .finish()
    }
}

impl Default for SoftDriver {
    fn default() -> Self {
        SoftDriver::new()
    }
}

impl SoftDriver {
    pub fn new() -> Self {
        SoftDriver::with_options(SoftDriverOptions::default())
    }

    pub fn with_options(options: SoftDriverOptions) -> Self {
        SoftDriver {
            options: Mutex::new(options),
            state: Mutex::new(State {
                next_id: 1,
                ticks: 0,
                adapters: HashMap::new(),
                devices: HashMap::new(),
                buffers: HashMap::new(),
                textures: HashMap::new(),
                swap_chains: HashMap::new(),
                containers: HashMap::new(),
                released: HashSet::new(),
                stats: HashMap::new(),
            }),
        }
    }

    fn options(&self) -> SoftDriverOptions {
        lock(&self.options).clone()
    }

    /// Runs `f` under the state lock, then runs the callbacks it deferred.
    fn with_state<R>(&self, f: impl FnOnce(&mut State, &mut Deferred) -> R) -> R {
        let mut deferred = Deferred::new();
        let result = {
            let mut state = lock(&self.state);
            f(&mut state, &mut deferred)
        };
        for callback in deferred {
            callback();
        }
        result
    }

    pub fn stats(&self) -> HandleStats {
        let state = lock(&self.state);
        HandleStats {
            kinds: ResourceKind::ALL
                .iter()
                .map(|kind| (*kind, state.stats.get(kind).copied().unwrap_or_default()))
                .collect(),
        }
    }

    /// Total device ticks so far.
    pub fn tick_count(&self) -> u64 {
        lock(&self.state).ticks
    }

    /// Map requests and work-done notifications not yet delivered, across devices.
    pub fn pending_operations(&self) -> usize {
        lock(&self.state)
            .devices
            .values()
            .map(|d| d.pending_maps.len() + d.work_done.len())
            .sum()
    }

    /// Frames presented on a swap chain.
    pub fn presented_frames(&self, swap_chain: SwapChainHandle) -> u64 {
        lock(&self.state)
            .swap_chains
            .get(&swap_chain.id())
            .map(|s| s.presented)
            .unwrap_or(0)
    }

    /// A copy of a buffer's current contents, or `None` once destroyed.
    ///
    /// Returns `None` while the buffer is mapped, since the mapping owns the bytes.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        let entry = state.buffers.get(&buffer.id())?;
        if entry.destroyed || entry.map != SoftMap::Unmapped {
            return None;
        }
        Some(entry.data.to_vec())
    }

    /// Stops (or resumes) completing map requests.
    pub fn set_complete_maps(&self, complete: bool) {
        lock(&self.options).complete_maps = complete;
    }

    /// Queues an error that the device reports on its next tick.
    pub fn inject_error(&self, device: DeviceHandle, category: ErrorCategory, message: &str) {
        let mut state = lock(&self.state);
        if let Some(device) = state.devices.get_mut(&device.id()) {
            device.injected_errors.push((category, message.to_string()));
        }
    }

    fn validate_buffer(descriptor: &BufferDescriptor, limits: &Limits) -> Result<(), (ErrorCategory, String)> {
        let usage = descriptor.usage;
        if usage.is_empty() {
            return Err((ErrorCategory::Validation, "buffer usage must not be empty".to_string()));
        }
        if usage.contains(BufferUsage::MAP_READ) && !(BufferUsage::MAP_READ | BufferUsage::COPY_DST).contains(usage) {
            return Err((
                ErrorCategory::Validation,
                "MAP_READ may only be combined with COPY_DST".to_string(),
            ));
        }
        if usage.contains(BufferUsage::MAP_WRITE) && !(BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC).contains(usage) {
            return Err((
                ErrorCategory::Validation,
                "MAP_WRITE may only be combined with COPY_SRC".to_string(),
            ));
        }
        if descriptor.mapped_at_creation && descriptor.size % 4 != 0 {
            return Err((
                ErrorCategory::Validation,
                format!("size {} of a buffer mapped at creation is not a multiple of 4", descriptor.size),
            ));
        }
        if descriptor.size > limits.max_buffer_size {
            return Err((
                ErrorCategory::OutOfMemory,
                format!(
                    "buffer of {} bytes exceeds the device limit of {}",
                    descriptor.size, limits.max_buffer_size
                ),
            ));
        }
        Ok(())
    }

    fn validate_texture(descriptor: &TextureDescriptor, limits: &Limits) -> Result<(), String> {
        let size = descriptor.size;
        if size.width == 0 || size.height == 0 || size.depth == 0 {
            return Err(format!(
                "texture size {}x{}x{} has a zero dimension",
                size.width, size.height, size.depth
            ));
        }
        let max = limits.max_texture_dimension_2d;
        if size.width > max || size.height > max {
            return Err(format!(
                "texture size {}x{} exceeds the device limit of {max}",
                size.width, size.height
            ));
        }
        if descriptor.usage.is_empty() {
            return Err("texture usage must not be empty".to_string());
        }
        if descriptor.mip_level_count == 0 {
            return Err("mip level count must be at least 1".to_string());
        }
        if !matches!(descriptor.sample_count, 1 | 4) {
            return Err(format!("sample count {} is not 1 or 4", descriptor.sample_count));
        }
        Ok(())
    }

    fn validate_container(
        state: &State,
        extensions: &Extensions,
        descriptor: &NativeAccelerationContainerDescriptor,
    ) -> Result<(), String> {
        if !extensions.ray_tracing {
            return Err("the ray tracing extension is not enabled on this device".to_string());
        }
        match descriptor.level {
            AccelerationContainerLevel::Bottom => {
                if descriptor.geometries.is_empty() || !descriptor.instances.is_empty() {
                    return Err("a bottom-level container takes geometries and no instances".to_string());
                }
                for (i, geometry) in descriptor.geometries.iter().enumerate() {
                    let vertices = state
                        .buffers
                        .get(&geometry.vertex_buffer.id())
                        .ok_or_else(|| format!("geometry {i}: unknown vertex buffer"))?;
                    if vertices.destroyed {
                        return Err(format!("geometry {i}: vertex buffer is destroyed"));
                    }
                    if !vertices.descriptor.usage.contains(BufferUsage::RAY_TRACING) {
                        return Err(format!("geometry {i}: vertex buffer lacks RAY_TRACING usage"));
                    }
                    if geometry.vertex_count == 0 {
                        return Err(format!("geometry {i}: vertex count is zero"));
                    }
                    if geometry.vertex_stride < geometry.vertex_format.byte_size() {
                        return Err(format!(
                            "geometry {i}: stride {} is smaller than a vertex",
                            geometry.vertex_stride
                        ));
                    }
                    let needed = u64::from(geometry.vertex_stride) * u64::from(geometry.vertex_count - 1)
                        + u64::from(geometry.vertex_format.byte_size());
                    if needed > vertices.descriptor.size {
                        return Err(format!(
                            "geometry {i}: {needed} bytes of vertices exceed the buffer's {}",
                            vertices.descriptor.size
                        ));
                    }
                    if let Some(index) = &geometry.index {
                        let indices = state
                            .buffers
                            .get(&index.buffer.id())
                            .ok_or_else(|| format!("geometry {i}: unknown index buffer"))?;
                        let needed = u64::from(index.format.byte_size()) * u64::from(index.count);
                        if indices.destroyed || needed > indices.descriptor.size {
                            return Err(format!("geometry {i}: index buffer cannot hold {} indices", index.count));
                        }
                    }
                }
            }
            AccelerationContainerLevel::Top => {
                if descriptor.instances.is_empty() || !descriptor.geometries.is_empty() {
                    return Err("a top-level container takes instances and no geometries".to_string());
                }
                for (i, instance) in descriptor.instances.iter().enumerate() {
                    match state.containers.get(&instance.geometry_container.id()) {
                        Some(ContainerEntry {
                            level: AccelerationContainerLevel::Bottom,
                        }) => {}
                        Some(_) => return Err(format!("instance {i}: geometry container is not bottom-level")),
                        None => return Err(format!("instance {i}: unknown geometry container")),
                    }
                }
            }
        }
        Ok(())
    }
}

fn mapping_of(data: &mut [u8]) -> NativeMapping {
    let len = data.len();
    //SAFETY: the allocation stays put until the buffer is unmapped, destroyed
    //or released, and the driver leaves mapped bytes alone
    unsafe { NativeMapping::new(NonNull::from(data).cast::<u8>(), len) }
}

impl Driver for SoftDriver {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn request_adapter(&self, options: &AdapterOptions) -> Result<AdapterHandle, Error> {
        let name = self.options().adapter_name;
        let info = AdapterInfo {
            name,
            backend: BACKEND_NAME.to_string(),
            is_fallback: options.force_fallback_adapter,
        };
        Ok(self.with_state(|state, _| {
            let id = state.mint(ResourceKind::Adapter);
            state.adapters.insert(id.get(), info);
            AdapterHandle::from_raw(id)
        }))
    }

    fn adapter_info(&self, adapter: AdapterHandle) -> Result<AdapterInfo, Error> {
        lock(&self.state)
            .adapters
            .get(&adapter.id())
            .cloned()
            .ok_or(Error::UnknownHandle {
                kind: "adapter",
                id: adapter.id(),
            })
    }

    fn release_adapter(&self, adapter: AdapterHandle) {
        self.with_state(|state, _| {
            if state.note_release(ResourceKind::Adapter, adapter.id()) {
                state.adapters.remove(&adapter.id());
            }
        })
    }

    fn create_device(&self, adapter: AdapterHandle, descriptor: &DeviceDescriptor) -> Result<DeviceHandle, Error> {
        let options = self.options();
        let requested = &descriptor.extensions;
        let supported = &options.supported_extensions;
        if (requested.ray_tracing && !supported.ray_tracing)
            || (requested.anisotropic_filtering && !supported.anisotropic_filtering)
        {
            return Err(Error::Unsupported {
                feature: "requested extensions",
                backend: BACKEND_NAME,
            });
        }
        let limits = &descriptor.limits;
        let max = &options.supported_limits;
        if limits.max_bind_groups > max.max_bind_groups
            || limits.max_buffer_size > max.max_buffer_size
            || limits.max_texture_dimension_2d > max.max_texture_dimension_2d
            || limits.max_uniform_buffer_binding_size > max.max_uniform_buffer_binding_size
        {
            return Err(Error::Backend(format!(
                "requested limits {limits:?} exceed the adapter's {max:?}"
            )));
        }
        self.with_state(|state, _| {
            if !state.adapters.contains_key(&adapter.id()) {
                return Err(Error::UnknownHandle {
                    kind: "adapter",
                    id: adapter.id(),
                });
            }
            let id = state.mint(ResourceKind::Device);
            state.devices.insert(
                id.get(),
                DeviceEntry {
                    descriptor: descriptor.clone(),
                    error_callback: None,
                    pending_maps: Vec::new(),
                    work_done: Vec::new(),
                    injected_errors: Vec::new(),
                },
            );
            Ok(DeviceHandle::from_raw(id))
        })
    }

    fn set_uncaptured_error_callback(&self, device: DeviceHandle, callback: Option<UncapturedErrorCallback>) {
        if let Some(device) = lock(&self.state).devices.get_mut(&device.id()) {
            device.error_callback = callback;
        }
    }

    fn device_tick(&self, device: DeviceHandle) {
        let complete_maps = self.options().complete_maps;
        self.with_state(|state, deferred| {
            state.ticks += 1;
            let State { devices, buffers, .. } = state;
            let Some(entry) = devices.get_mut(&device.id()) else {
                return;
            };
            let mut still_pending = Vec::new();
            for mut pending in std::mem::take(&mut entry.pending_maps) {
                if let Some(status) = pending.failure {
                    let callback = pending.callback;
                    deferred.push(Box::new(move || callback(Err(status))));
                    continue;
                }
                if !complete_maps {
                    still_pending.push(pending);
                    continue;
                }
                pending.ticks_left = pending.ticks_left.saturating_sub(1);
                if pending.ticks_left > 0 {
                    still_pending.push(pending);
                    continue;
                }
                let callback = pending.callback;
                match buffers.get_mut(&pending.buffer) {
                    Some(buffer) if buffer.map == SoftMap::Pending(pending.mode) => {
                        buffer.map = SoftMap::Mapped(pending.mode);
                        let mapping = mapping_of(&mut buffer.data);
                        deferred.push(Box::new(move || callback(Ok(mapping))));
                    }
                    _ => deferred.push(Box::new(move || callback(Err(MapAsyncStatus::Error)))),
                }
            }
            entry.pending_maps = still_pending;
            for done in std::mem::take(&mut entry.work_done) {
                deferred.push(done);
            }
            let injected = std::mem::take(&mut entry.injected_errors);
            match entry.error_callback.clone() {
                Some(callback) => {
                    for (category, message) in injected {
                        let callback = callback.clone();
                        deferred.push(Box::new(move || callback(category, &message)));
                    }
                }
                None if !injected.is_empty() => {
                    logwise::warn_sync!("dropping {n} injected errors; no callback", n = injected.len());
                }
                None => {}
            }
        })
    }

    fn queue_on_submitted_work_done(&self, device: DeviceHandle, callback: WorkDoneCallback) {
        let callback = {
            let mut state = lock(&self.state);
            match state.devices.get_mut(&device.id()) {
                Some(device) => {
                    device.work_done.push(callback);
                    return;
                }
                None => callback,
            }
        };
        logwise::warn_sync!("work-done request on an unknown device; completing now");
        callback();
    }

    fn release_device(&self, device: DeviceHandle) {
        self.with_state(|state, deferred| {
            if !state.note_release(ResourceKind::Device, device.id()) {
                return;
            }
            if let Some(entry) = state.devices.remove(&device.id()) {
                for pending in entry.pending_maps {
                    let callback = pending.callback;
                    deferred.push(Box::new(move || callback(Err(MapAsyncStatus::DeviceLost))));
                }
                for done in entry.work_done {
                    deferred.push(done);
                }
            }
        })
    }

    fn create_buffer(
        &self,
        device: DeviceHandle,
        descriptor: &BufferDescriptor,
    ) -> Result<(BufferHandle, Option<NativeMapping>), Error> {
        self.with_state(|state, deferred| {
            let limits = match state.devices.get(&device.id()) {
                Some(entry) => entry.descriptor.limits.clone(),
                None => {
                    return Err(Error::UnknownHandle {
                        kind: "device",
                        id: device.id(),
                    });
                }
            };
            let id = state.mint(ResourceKind::Buffer);
            let validation = Self::validate_buffer(descriptor, &limits);
            let valid = validation.is_ok();
            if let Err((category, message)) = validation {
                state.report(device.id(), category, message, deferred);
            }
            let size = if valid { descriptor.size as usize } else { 0 };
            let mut entry = BufferEntry {
                device: device.id(),
                descriptor: descriptor.clone(),
                data: vec![0u8; size].into_boxed_slice(),
                map: SoftMap::Unmapped,
                destroyed: false,
                valid,
            };
            let mapping = (valid && descriptor.mapped_at_creation).then(|| {
                entry.map = SoftMap::Mapped(MapMode::Write);
                mapping_of(&mut entry.data)
            });
            state.buffers.insert(id.get(), entry);
            Ok((BufferHandle::from_raw(id), mapping))
        })
    }

    fn describe_buffer(&self, buffer: BufferHandle) -> Option<BufferDescriptor> {
        lock(&self.state)
            .buffers
            .get(&buffer.id())
            .map(|b| b.descriptor.clone())
    }

    fn buffer_set_sub_data(&self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        self.with_state(|state, deferred| {
            let Some(entry) = state.buffers.get_mut(&buffer.id()) else {
                return;
            };
            let device = entry.device;
            let end = offset.checked_add(data.len() as u64);
            let problem = if !entry.valid {
                Some("buffer is invalid".to_string())
            } else if entry.destroyed {
                Some("buffer is destroyed".to_string())
            } else if entry.map != SoftMap::Unmapped {
                Some("buffer is mapped or has a map request outstanding".to_string())
            } else if !entry.descriptor.usage.contains(BufferUsage::COPY_DST) {
                Some("buffer lacks COPY_DST usage".to_string())
            } else if end.is_none_or(|end| end > entry.descriptor.size) {
                Some(format!(
                    "write of {} bytes at {offset} overruns a buffer of {}",
                    data.len(),
                    entry.descriptor.size
                ))
            } else {
                let start = offset as usize;
                entry.data[start..start + data.len()].copy_from_slice(data);
                None
            };
            if let Some(problem) = problem {
                state.report(device, ErrorCategory::Validation, format!("setSubData: {problem}"), deferred);
            }
        })
    }

    fn buffer_map_async(&self, buffer: BufferHandle, mode: MapMode, callback: MapCallback) {
        let latency = self.options().map_latency_ticks.max(1);
        self.with_state(|state, deferred| {
            let Some(entry) = state.buffers.get_mut(&buffer.id()) else {
                deferred.push(Box::new(move || callback(Err(MapAsyncStatus::Error))));
                return;
            };
            let device = entry.device;
            let needed = match mode {
                MapMode::Read => BufferUsage::MAP_READ,
                MapMode::Write => BufferUsage::MAP_WRITE,
            };
            let problem = if !entry.valid {
                Some("buffer is invalid".to_string())
            } else if entry.destroyed {
                Some("buffer is destroyed".to_string())
            } else if entry.map != SoftMap::Unmapped {
                Some("buffer is already mapped or has a map request outstanding".to_string())
            } else if !entry.descriptor.usage.contains(needed) {
                Some(format!("buffer lacks {needed:?} usage"))
            } else {
                entry.map = SoftMap::Pending(mode);
                None
            };
            let failure = problem.is_some().then_some(MapAsyncStatus::Error);
            if let Some(problem) = problem {
                state.report(device, ErrorCategory::Validation, format!("mapAsync: {problem}"), deferred);
            }
            match state.devices.get_mut(&device) {
                Some(device) => device.pending_maps.push(PendingMap {
                    buffer: buffer.id(),
                    mode,
                    ticks_left: latency,
                    failure,
                    callback,
                }),
                None => deferred.push(Box::new(move || callback(Err(MapAsyncStatus::DeviceLost)))),
            }
        })
    }

    fn buffer_unmap(&self, buffer: BufferHandle) {
        self.with_state(|state, deferred| {
            let Some(entry) = state.buffers.get_mut(&buffer.id()) else {
                return;
            };
            let was = std::mem::replace(&mut entry.map, SoftMap::Unmapped);
            if matches!(was, SoftMap::Pending(_)) {
                state.abort_pending_map(buffer.id(), MapAsyncStatus::Aborted, deferred);
            }
        })
    }

    fn buffer_destroy(&self, buffer: BufferHandle) {
        self.with_state(|state, deferred| {
            state.abort_pending_map(buffer.id(), MapAsyncStatus::DestroyedBeforeCallback, deferred);
            if let Some(entry) = state.buffers.get_mut(&buffer.id()) {
                entry.map = SoftMap::Unmapped;
                entry.destroyed = true;
                entry.data = Box::default();
            }
        })
    }

    fn release_buffer(&self, buffer: BufferHandle) {
        self.with_state(|state, deferred| {
            if !state.note_release(ResourceKind::Buffer, buffer.id()) {
                return;
            }
            state.abort_pending_map(buffer.id(), MapAsyncStatus::DestroyedBeforeCallback, deferred);
            state.buffers.remove(&buffer.id());
        })
    }

    fn create_texture(&self, device: DeviceHandle, descriptor: &TextureDescriptor) -> Result<TextureHandle, Error> {
        self.with_state(|state, deferred| {
            let limits = match state.devices.get(&device.id()) {
                Some(entry) => entry.descriptor.limits.clone(),
                None => {
                    return Err(Error::UnknownHandle {
                        kind: "device",
                        id: device.id(),
                    });
                }
            };
            if let Err(message) = Self::validate_texture(descriptor, &limits) {
                state.report(device.id(), ErrorCategory::Validation, message, deferred);
            }
            let id = state.mint(ResourceKind::Texture);
            state.textures.insert(
                id.get(),
                TextureEntry {
                    descriptor: descriptor.clone(),
                    destroyed: false,
                },
            );
            Ok(TextureHandle::from_raw(id))
        })
    }

    fn describe_texture(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        lock(&self.state)
            .textures
            .get(&texture.id())
            .map(|t| t.descriptor.clone())
    }

    fn texture_destroy(&self, texture: TextureHandle) {
        if let Some(entry) = lock(&self.state).textures.get_mut(&texture.id()) {
            entry.destroyed = true;
        }
    }

    fn release_texture(&self, texture: TextureHandle) {
        self.with_state(|state, _| {
            if state.note_release(ResourceKind::Texture, texture.id()) {
                state.textures.remove(&texture.id());
                for swap_chain in state.swap_chains.values_mut() {
                    if swap_chain.current == Some(texture.id()) {
                        swap_chain.current = None;
                    }
                }
            }
        })
    }

    fn preferred_swap_chain_format(&self, device: DeviceHandle) -> Result<TextureFormat, Error> {
        if !lock(&self.state).devices.contains_key(&device.id()) {
            return Err(Error::UnknownHandle {
                kind: "device",
                id: device.id(),
            });
        }
        Ok(self.options().preferred_format)
    }

    fn create_swap_chain(
        &self,
        device: DeviceHandle,
        surface: &SurfaceTarget,
        descriptor: &NativeSwapChainDescriptor,
    ) -> Result<SwapChainHandle, Error> {
        let size = surface.size();
        self.with_state(|state, deferred| {
            if !state.devices.contains_key(&device.id()) {
                return Err(Error::UnknownHandle {
                    kind: "device",
                    id: device.id(),
                });
            }
            if !descriptor.format.is_presentable() {
                state.report(
                    device.id(),
                    ErrorCategory::Validation,
                    format!("{} cannot be presented", descriptor.format),
                    deferred,
                );
            }
            let id = state.mint(ResourceKind::SwapChain);
            state.swap_chains.insert(
                id.get(),
                SwapChainEntry {
                    device: device.id(),
                    descriptor: *descriptor,
                    width: size.width,
                    height: size.height,
                    current: None,
                    presented: 0,
                },
            );
            Ok(SwapChainHandle::from_raw(id))
        })
    }

    fn swap_chain_current_texture(&self, swap_chain: SwapChainHandle) -> Result<TextureHandle, Error> {
        self.with_state(|state, _| {
            let entry = state.swap_chains.get(&swap_chain.id()).ok_or(Error::UnknownHandle {
                kind: "swap chain",
                id: swap_chain.id(),
            })?;
            let descriptor = TextureDescriptor::new(
                crate::descriptors::Extent3d::new(entry.width, entry.height),
                entry.descriptor.format,
                entry.descriptor.usage,
            );
            let id = state.mint(ResourceKind::Texture);
            state.textures.insert(
                id.get(),
                TextureEntry {
                    descriptor,
                    destroyed: false,
                },
            );
            if let Some(entry) = state.swap_chains.get_mut(&swap_chain.id()) {
                entry.current = Some(id.get());
            }
            Ok(TextureHandle::from_raw(id))
        })
    }

    fn swap_chain_present(&self, swap_chain: SwapChainHandle) {
        self.with_state(|state, deferred| {
            let State {
                swap_chains, textures, ..
            } = &mut *state;
            let Some(entry) = swap_chains.get_mut(&swap_chain.id()) else {
                return;
            };
            match entry.current.take() {
                Some(texture) => {
                    entry.presented += 1;
                    if let Some(texture) = textures.get_mut(&texture) {
                        texture.destroyed = true;
                    }
                }
                None => {
                    let device = entry.device;
                    state.report(
                        device,
                        ErrorCategory::Validation,
                        "present without a current texture".to_string(),
                        deferred,
                    );
                }
            }
        })
    }

    fn release_swap_chain(&self, swap_chain: SwapChainHandle) {
        self.with_state(|state, _| {
            if state.note_release(ResourceKind::SwapChain, swap_chain.id()) {
                state.swap_chains.remove(&swap_chain.id());
            }
        })
    }

    fn create_acceleration_container(
        &self,
        device: DeviceHandle,
        descriptor: &NativeAccelerationContainerDescriptor,
    ) -> Result<AccelerationContainerHandle, Error> {
        self.with_state(|state, deferred| {
            let extensions = match state.devices.get(&device.id()) {
                Some(entry) => entry.descriptor.extensions.clone(),
                None => {
                    return Err(Error::UnknownHandle {
                        kind: "device",
                        id: device.id(),
                    });
                }
            };
            if let Err(message) = Self::validate_container(state, &extensions, descriptor) {
                state.report(
                    device.id(),
                    ErrorCategory::Validation,
                    format!("createRayTracingAccelerationContainer: {message}"),
                    deferred,
                );
            }
            let id = state.mint(ResourceKind::AccelerationContainer);
            state.containers.insert(
                id.get(),
                ContainerEntry {
                    level: descriptor.level,
                },
            );
            Ok(AccelerationContainerHandle::from_raw(id))
        })
    }

    fn release_acceleration_container(&self, container: AccelerationContainerHandle) {
        self.with_state(|state, _| {
            if state.note_release(ResourceKind::AccelerationContainer, container.id()) {
                state.containers.remove(&container.id());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device(driver: &SoftDriver) -> DeviceHandle {
        let adapter = driver.request_adapter(&AdapterOptions::default()).unwrap();
        driver.create_device(adapter, &DeviceDescriptor::default()).unwrap()
    }

    fn collect_errors(driver: &SoftDriver, device: DeviceHandle) -> Arc<Mutex<Vec<String>>> {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let move_errors = errors.clone();
        driver.set_uncaptured_error_callback(
            device,
            Some(Arc::new(move |_: ErrorCategory, message: &str| {
                move_errors.lock().unwrap().push(message.to_string());
            })),
        );
        errors
    }

    #[test]
    fn maps_complete_only_on_tick() {
        let driver = SoftDriver::with_options(SoftDriverOptions {
            map_latency_ticks: 2,
            ..Default::default()
        });
        let device = device(&driver);
        let (buffer, _) = driver
            .create_buffer(device, &BufferDescriptor::new(8, BufferUsage::MAP_READ))
            .unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let move_fired = fired.clone();
        driver.buffer_map_async(
            buffer,
            MapMode::Read,
            Box::new(move |outcome| {
                assert_eq!(outcome.unwrap().len(), 8);
                move_fired.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(driver.pending_operations(), 1);
        driver.device_tick(device);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        driver.device_tick(device);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(driver.pending_operations(), 0);
        driver.buffer_unmap(buffer);
        driver.release_buffer(buffer);
    }

    #[test]
    fn invalid_usage_is_reported_not_returned() {
        let driver = SoftDriver::new();
        let device = device(&driver);
        let errors = collect_errors(&driver, device);
        let (buffer, mapping) = driver
            .create_buffer(
                device,
                &BufferDescriptor::new(8, BufferUsage::MAP_READ | BufferUsage::VERTEX),
            )
            .unwrap();
        assert!(mapping.is_none());
        assert_eq!(errors.lock().unwrap().len(), 1);
        driver.buffer_set_sub_data(buffer, 0, &[1]);
        assert_eq!(errors.lock().unwrap().len(), 2);
        assert!(errors.lock().unwrap()[1].starts_with("setSubData"));
    }

    #[test]
    fn unmap_aborts_a_pending_map() {
        let driver = SoftDriver::new();
        let device = device(&driver);
        let (buffer, _) = driver
            .create_buffer(device, &BufferDescriptor::new(4, BufferUsage::MAP_WRITE))
            .unwrap();
        let status = Arc::new(Mutex::new(None));
        let move_status = status.clone();
        driver.buffer_map_async(
            buffer,
            MapMode::Write,
            Box::new(move |outcome| {
                *move_status.lock().unwrap() = Some(outcome.err());
            }),
        );
        driver.buffer_unmap(buffer);
        assert_eq!(*status.lock().unwrap(), Some(Some(MapAsyncStatus::Aborted)));
        driver.device_tick(device);
        assert_eq!(driver.pending_operations(), 0);
    }

    #[test]
    fn double_release_is_counted() {
        let driver = SoftDriver::new();
        let device = device(&driver);
        let (buffer, _) = driver
            .create_buffer(device, &BufferDescriptor::new(4, BufferUsage::COPY_DST))
            .unwrap();
        driver.release_buffer(buffer);
        driver.release_buffer(buffer);
        let stats = driver.stats().kind(ResourceKind::Buffer);
        assert_eq!(stats.created, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.double_releases, 1);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn set_sub_data_writes_through() {
        let driver = SoftDriver::new();
        let device = device(&driver);
        let (buffer, _) = driver
            .create_buffer(
                device,
                &BufferDescriptor::new(4, BufferUsage::COPY_DST | BufferUsage::MAP_READ),
            )
            .unwrap();
        driver.buffer_set_sub_data(buffer, 2, &[7, 8]);
        assert_eq!(driver.buffer_contents(buffer), Some(vec![0, 0, 7, 8]));
        driver.buffer_destroy(buffer);
        assert_eq!(driver.buffer_contents(buffer), None);
    }
}
