// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The wgpu driver.

Maps the [`Driver`] seam onto a real GPU through wgpu. wgpu delivers its own
callbacks (map completions, work-done notifications, uncaptured errors) from
inside `Device::poll` and friends; this driver parks them in shared queues and
only delivers them from [`Driver::device_tick`], outside its state lock.

Native targets only. Ray-tracing containers and headless surfaces are not
available here and are refused with [`Error::Unsupported`].
*/

use crate::descriptors::{AdapterOptions, BufferDescriptor, DeviceDescriptor, TextureDescriptor, TextureFormat};
use crate::errors::ErrorCategory;
use crate::imp::{
    AccelerationContainerHandle, AdapterHandle, AdapterInfo, BufferHandle, DeviceHandle, Driver,
    Error, MapAsyncStatus, MapCallback, MapMode, NativeAccelerationContainerDescriptor,
    NativeMapping, NativeSwapChainDescriptor, SwapChainHandle, TextureHandle,
    UncapturedErrorCallback, WorkDoneCallback,
};
use crate::objects::SurfaceTarget;
use crate::sys::sync::lock;
use buffer::ShadowBuffer;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};

mod buffer;
mod error;
mod pixel_format;

const BACKEND_NAME: &str = "wgpu";

/// Something wgpu finished while polling, waiting to be delivered.
pub(super) enum Completion {
    Map { buffer: u64, generation: u64, ok: bool },
    WorkDone(WorkDoneCallback),
}

type Deferred = Vec<Box<dyn FnOnce() + Send>>;
type ErrorQueue = Arc<Mutex<Vec<(u64, ErrorCategory, String)>>>;

struct DeviceEntry {
    device: wgpu::Device,
    queue: wgpu::Queue,
    callback: Option<UncapturedErrorCallback>,
    completions: Arc<Mutex<Vec<Completion>>>,
}

struct TextureEntry {
    texture: wgpu::Texture,
    descriptor: TextureDescriptor,
    //frame textures belong to the surface
    frame: bool,
}

struct SwapChainEntry {
    device: u64,
    surface: wgpu::Surface<'static>,
    descriptor: NativeSwapChainDescriptor,
    width: u32,
    height: u32,
    frame: Option<wgpu::SurfaceTexture>,
}

struct State {
    next_id: u64,
    adapters: HashMap<u64, wgpu::Adapter>,
    devices: HashMap<u64, DeviceEntry>,
    buffers: HashMap<u64, ShadowBuffer>,
    textures: HashMap<u64, TextureEntry>,
    swap_chains: HashMap<u64, SwapChainEntry>,
}

impl State {
    fn mint(&mut self) -> NonZeroU64 {
        let id = self.next_id;
        self.next_id += 1;
        NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN)
    }

    fn device(&self, device: DeviceHandle) -> Result<&DeviceEntry, Error> {
        self.devices.get(&device.id()).ok_or(Error::UnknownHandle {
            kind: "device",
            id: device.id(),
        })
    }
}

pub(crate) struct WgpuDriver {
    instance: wgpu::Instance,
    state: Mutex<State>,
    errors: ErrorQueue,
}

impl Debug for WgpuDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("WgpuDriver")
            .field("devices", &state.devices.len())
            .field("buffers", &state.buffers.len())
            .finish()
    }
}

impl WgpuDriver {
    pub(crate) fn new() -> Self {
        let descriptor = wgpu::InstanceDescriptor::from_env_or_default();
        WgpuDriver {
            instance: wgpu::Instance::new(&descriptor),
            state: Mutex::new(State {
                next_id: 1,
                adapters: HashMap::new(),
                devices: HashMap::new(),
                buffers: HashMap::new(),
                textures: HashMap::new(),
                swap_chains: HashMap::new(),
            }),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runs `f` under the state lock, then delivers what it deferred and any queued errors.
    fn with_state<R>(&self, f: impl FnOnce(&mut State, &mut Deferred) -> R) -> R {
        let mut deferred = Deferred::new();
        let result = {
            let mut state = lock(&self.state);
            f(&mut state, &mut deferred)
        };
        for callback in deferred {
            callback();
        }
        self.flush_errors();
        result
    }

    fn flush_errors(&self) {
        let queued = std::mem::take(&mut *lock(&self.errors));
        if queued.is_empty() {
            return;
        }
        let callbacks: HashMap<u64, Option<UncapturedErrorCallback>> = {
            let state = lock(&self.state);
            queued
                .iter()
                .map(|(device, _, _)| {
                    let callback = state.devices.get(device).and_then(|d| d.callback.clone());
                    (*device, callback)
                })
                .collect()
        };
        for (device, category, message) in queued {
            match callbacks.get(&device).cloned().flatten() {
                Some(callback) => callback(category, &message),
                None => logwise::warn_sync!(
                    "wgpu error on device {device} without a callback: {message}",
                    device = device,
                    message = message
                ),
            }
        }
    }

    fn report(&self, device: u64, category: ErrorCategory, message: String) {
        lock(&self.errors).push((device, category, message));
    }
}

impl Driver for WgpuDriver {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn request_adapter(&self, options: &AdapterOptions) -> Result<AdapterHandle, Error> {
        let request = wgpu::RequestAdapterOptions {
            power_preference: pixel_format::power_preference(options.power_preference),
            force_fallback_adapter: options.force_fallback_adapter,
            compatible_surface: None,
        };
        let adapter = pollster::block_on(self.instance.request_adapter(&request))?;
        logwise::info_sync!(
            "wgpu adapter {name}",
            name = adapter.get_info().name
        );
        Ok(self.with_state(|state, _| {
            let id = state.mint();
            state.adapters.insert(id.get(), adapter);
            AdapterHandle::from_raw(id)
        }))
    }

    fn adapter_info(&self, adapter: AdapterHandle) -> Result<AdapterInfo, Error> {
        let state = lock(&self.state);
        let adapter = state.adapters.get(&adapter.id()).ok_or(Error::UnknownHandle {
            kind: "adapter",
            id: adapter.id(),
        })?;
        let info = adapter.get_info();
        Ok(AdapterInfo {
            name: info.name,
            backend: format!("{:?}", info.backend),
            is_fallback: info.device_type == wgpu::DeviceType::Cpu,
        })
    }

    fn release_adapter(&self, adapter: AdapterHandle) {
        lock(&self.state).adapters.remove(&adapter.id());
    }

    fn create_device(&self, adapter: AdapterHandle, descriptor: &DeviceDescriptor) -> Result<DeviceHandle, Error> {
        if descriptor.extensions.ray_tracing {
            return Err(Error::Unsupported {
                feature: "ray tracing",
                backend: BACKEND_NAME,
            });
        }
        let adapter = lock(&self.state)
            .adapters
            .get(&adapter.id())
            .cloned()
            .ok_or(Error::UnknownHandle {
                kind: "adapter",
                id: adapter.id(),
            })?;
        let mut required_limits = wgpu::Limits::downlevel_defaults();
        required_limits.max_bind_groups = descriptor.limits.max_bind_groups;
        required_limits.max_buffer_size = descriptor.limits.max_buffer_size;
        required_limits.max_texture_dimension_2d = descriptor.limits.max_texture_dimension_2d;
        required_limits.max_uniform_buffer_binding_size = descriptor.limits.max_uniform_buffer_binding_size;
        let wgpu_descriptor = wgpu::DeviceDescriptor {
            label: Some("host_gpu device"),
            //anisotropic filtering is core in wgpu
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: Default::default(),
            trace: wgpu::Trace::Off,
        };
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu_descriptor))?;

        let id = lock(&self.state).mint();
        let errors = self.errors.clone();
        let device_id = id.get();
        device.on_uncaptured_error(Box::new(move |e: wgpu::Error| {
            let (category, message) = error::categorize(&e);
            lock(&errors).push((device_id, category, message));
        }));
        let errors = self.errors.clone();
        device.set_device_lost_callback(move |reason, message| {
            if matches!(reason, wgpu::DeviceLostReason::Destroyed) {
                return;
            }
            lock(&errors).push((device_id, ErrorCategory::DeviceLost, message));
        });
        self.with_state(|state, _| {
            state.devices.insert(
                device_id,
                DeviceEntry {
                    device,
                    queue,
                    callback: None,
                    completions: Arc::new(Mutex::new(Vec::new())),
                },
            );
        });
        Ok(DeviceHandle::from_raw(id))
    }

    fn set_uncaptured_error_callback(&self, device: DeviceHandle, callback: Option<UncapturedErrorCallback>) {
        if let Some(device) = lock(&self.state).devices.get_mut(&device.id()) {
            device.callback = callback;
        }
    }

    fn device_tick(&self, device: DeviceHandle) {
        let Some((wgpu_device, completions)) = lock(&self.state)
            .devices
            .get(&device.id())
            .map(|d| (d.device.clone(), d.completions.clone()))
        else {
            return;
        };
        //wgpu runs its callbacks from inside poll; they only push into queues
        if let Err(e) = wgpu_device.poll(wgpu::PollType::Poll) {
            logwise::warn_sync!("wgpu poll failed: {err}", err = logwise::privacy::LogIt(&e));
        }
        let finished = std::mem::take(&mut *lock(&completions));
        self.with_state(|state, deferred| {
            for completion in finished {
                match completion {
                    Completion::Map {
                        buffer,
                        generation,
                        ok,
                    } => {
                        let Some(entry) = state.buffers.get_mut(&buffer) else {
                            continue;
                        };
                        if let Some((callback, outcome)) = entry.complete(generation, ok) {
                            deferred.push(Box::new(move || callback(outcome)));
                        }
                    }
                    Completion::WorkDone(callback) => deferred.push(callback),
                }
            }
        })
    }

    fn queue_on_submitted_work_done(&self, device: DeviceHandle, callback: WorkDoneCallback) {
        let callback = {
            let state = lock(&self.state);
            match state.devices.get(&device.id()) {
                Some(entry) => {
                    let completions = entry.completions.clone();
                    entry.queue.on_submitted_work_done(move || {
                        lock(&completions).push(Completion::WorkDone(callback));
                    });
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
            let Some(entry) = state.devices.remove(&device.id()) else {
                return;
            };
            for buffer in state.buffers.values_mut().filter(|b| b.device == device.id()) {
                if let Some(callback) = buffer.take_pending() {
                    deferred.push(Box::new(move || callback(Err(MapAsyncStatus::DeviceLost))));
                }
            }
            for completion in std::mem::take(&mut *lock(&entry.completions)) {
                if let Completion::WorkDone(callback) = completion {
                    deferred.push(callback);
                }
            }
            entry.device.destroy();
        })
    }

    fn create_buffer(
        &self,
        device: DeviceHandle,
        descriptor: &BufferDescriptor,
    ) -> Result<(BufferHandle, Option<NativeMapping>), Error> {
        self.with_state(|state, _| {
            let wgpu_device = state.device(device)?.device.clone();
            let (buffer, mapping) = match ShadowBuffer::new(&wgpu_device, device.id(), descriptor) {
                Ok(created) => created,
                Err((buffer, category, message)) => {
                    self.report(device.id(), category, message);
                    (buffer, None)
                }
            };
            let id = state.mint();
            state.buffers.insert(id.get(), buffer);
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
        let state = lock(&self.state);
        let Some(entry) = state.buffers.get(&buffer.id()) else {
            return;
        };
        if let Some(device) = state.devices.get(&entry.device) {
            device.queue.write_buffer(entry.wgpu_buffer(), offset, data);
            //staged writes land at the next submission, which must precede any later map
            device.queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        }
    }

    fn buffer_map_async(&self, buffer: BufferHandle, mode: MapMode, callback: MapCallback) {
        let rejected = self.with_state(|state, deferred| {
            let Some(entry) = state.buffers.get_mut(&buffer.id()) else {
                deferred.push(Box::new(move || callback(Err(MapAsyncStatus::DestroyedBeforeCallback))));
                return None;
            };
            let Some(completions) = state.devices.get(&entry.device).map(|d| d.completions.clone()) else {
                deferred.push(Box::new(move || callback(Err(MapAsyncStatus::DeviceLost))));
                return None;
            };
            match entry.map_async(buffer.id(), mode, callback, &completions) {
                Ok(()) => None,
                Err((callback, message)) => {
                    deferred.push(Box::new(move || callback(Err(MapAsyncStatus::Error))));
                    Some((entry.device, message))
                }
            }
        });
        if let Some((device, message)) = rejected {
            self.report(device, ErrorCategory::Validation, format!("mapAsync: {message}"));
            self.flush_errors();
        }
    }

    fn buffer_unmap(&self, buffer: BufferHandle) {
        self.with_state(|state, deferred| {
            if let Some(callback) = state.buffers.get_mut(&buffer.id()).and_then(ShadowBuffer::unmap) {
                deferred.push(Box::new(move || callback(Err(MapAsyncStatus::Aborted))));
            }
        })
    }

    fn buffer_destroy(&self, buffer: BufferHandle) {
        self.with_state(|state, deferred| {
            if let Some(callback) = state.buffers.get_mut(&buffer.id()).and_then(ShadowBuffer::destroy) {
                deferred.push(Box::new(move || callback(Err(MapAsyncStatus::DestroyedBeforeCallback))));
            }
        })
    }

    fn release_buffer(&self, buffer: BufferHandle) {
        self.with_state(|state, deferred| {
            if let Some(mut entry) = state.buffers.remove(&buffer.id()) {
                if let Some(callback) = entry.destroy() {
                    deferred.push(Box::new(move || callback(Err(MapAsyncStatus::DestroyedBeforeCallback))));
                }
            }
        })
    }

    fn create_texture(&self, device: DeviceHandle, descriptor: &TextureDescriptor) -> Result<TextureHandle, Error> {
        self.with_state(|state, _| {
            let wgpu_device = state.device(device)?.device.clone();
            let texture = wgpu_device.create_texture(&wgpu::TextureDescriptor {
                label: descriptor.label.as_deref(),
                size: wgpu::Extent3d {
                    width: descriptor.size.width,
                    height: descriptor.size.height,
                    depth_or_array_layers: descriptor.size.depth,
                },
                mip_level_count: descriptor.mip_level_count,
                sample_count: descriptor.sample_count,
                dimension: pixel_format::texture_dimension(descriptor.dimension),
                format: pixel_format::texture_format(descriptor.format),
                usage: pixel_format::texture_usage(descriptor.usage),
                view_formats: &[],
            });
            let id = state.mint();
            state.textures.insert(
                id.get(),
                TextureEntry {
                    texture,
                    descriptor: descriptor.clone(),
                    frame: false,
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
        if let Some(entry) = lock(&self.state).textures.get(&texture.id()) {
            if !entry.frame {
                entry.texture.destroy();
            }
        }
    }

    fn release_texture(&self, texture: TextureHandle) {
        lock(&self.state).textures.remove(&texture.id());
    }

    fn preferred_swap_chain_format(&self, device: DeviceHandle) -> Result<TextureFormat, Error> {
        lock(&self.state).device(device)?;
        Ok(TextureFormat::Bgra8Unorm)
    }

    fn create_swap_chain(
        &self,
        device: DeviceHandle,
        surface: &SurfaceTarget,
        descriptor: &NativeSwapChainDescriptor,
    ) -> Result<SwapChainHandle, Error> {
        let SurfaceTarget::Window {
            handles,
            width,
            height,
        } = surface
        else {
            return Err(Error::Unsupported {
                feature: "headless surfaces",
                backend: BACKEND_NAME,
            });
        };
        //SAFETY: `WindowHandles::from_window` obliges the caller to keep the
        //window alive for as long as swap chains built on it
        let wgpu_surface = unsafe {
            self.instance
                .create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                    raw_display_handle: handles.display(),
                    raw_window_handle: handles.window(),
                })
        }?;
        self.with_state(|state, _| {
            let wgpu_device = state.device(device)?.device.clone();
            wgpu_surface.configure(
                &wgpu_device,
                &wgpu::SurfaceConfiguration {
                    usage: pixel_format::texture_usage(descriptor.usage),
                    format: pixel_format::texture_format(descriptor.format),
                    width: *width,
                    height: *height,
                    present_mode: wgpu::PresentMode::Fifo,
                    desired_maximum_frame_latency: 2,
                    alpha_mode: wgpu::CompositeAlphaMode::Auto,
                    view_formats: vec![],
                },
            );
            let id = state.mint();
            state.swap_chains.insert(
                id.get(),
                SwapChainEntry {
                    device: device.id(),
                    surface: wgpu_surface,
                    descriptor: *descriptor,
                    width: *width,
                    height: *height,
                    frame: None,
                },
            );
            Ok(SwapChainHandle::from_raw(id))
        })
    }

    fn swap_chain_current_texture(&self, swap_chain: SwapChainHandle) -> Result<TextureHandle, Error> {
        self.with_state(|state, _| {
            let entry = state.swap_chains.get_mut(&swap_chain.id()).ok_or(Error::UnknownHandle {
                kind: "swap chain",
                id: swap_chain.id(),
            })?;
            if entry.frame.is_none() {
                entry.frame = Some(entry.surface.get_current_texture()?);
            }
            let texture = match &entry.frame {
                Some(frame) => frame.texture.clone(),
                None => return Err(Error::Backend("no frame after acquisition".to_string())),
            };
            let descriptor = TextureDescriptor::new(
                crate::descriptors::Extent3d::new(entry.width, entry.height),
                entry.descriptor.format,
                entry.descriptor.usage,
            );
            let id = state.mint();
            state.textures.insert(
                id.get(),
                TextureEntry {
                    texture,
                    descriptor,
                    frame: true,
                },
            );
            Ok(TextureHandle::from_raw(id))
        })
    }

    fn swap_chain_present(&self, swap_chain: SwapChainHandle) {
        let presented = {
            let mut state = lock(&self.state);
            match state.swap_chains.get_mut(&swap_chain.id()) {
                Some(entry) => match entry.frame.take() {
                    Some(frame) => {
                        frame.present();
                        Ok(())
                    }
                    None => Err(entry.device),
                },
                None => return,
            }
        };
        if let Err(device) = presented {
            self.report(
                device,
                ErrorCategory::Validation,
                "present: no frame was acquired".to_string(),
            );
            self.flush_errors();
        }
    }

    fn release_swap_chain(&self, swap_chain: SwapChainHandle) {
        lock(&self.state).swap_chains.remove(&swap_chain.id());
    }

    fn create_acceleration_container(
        &self,
        _device: DeviceHandle,
        _descriptor: &NativeAccelerationContainerDescriptor,
    ) -> Result<AccelerationContainerHandle, Error> {
        Err(Error::Unsupported {
            feature: "ray tracing",
            backend: BACKEND_NAME,
        })
    }

    fn release_acceleration_container(&self, _container: AccelerationContainerHandle) {}
}
