// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0

//! Mappable buffers for the wgpu backend.
//!
//! wgpu hands out mapped ranges as guards borrowed from the buffer, which
//! cannot cross the driver seam. Instead each buffer keeps a CPU shadow copy:
//!
//! * a completed read map copies the GPU contents into the shadow and unmaps
//!   the wgpu buffer right away;
//! * a completed write map copies the GPU contents into the shadow and leaves
//!   the wgpu buffer mapped; unmapping copies the shadow back first.
//!
//! Callers only ever see the shadow.

use super::Completion;
use crate::descriptors::BufferDescriptor;
use crate::errors::ErrorCategory;
use crate::imp::{MapAsyncStatus, MapCallback, MapMode, NativeMapping};
use crate::mapping::MapOutcome;
use crate::sys::sync::lock;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShadowState {
    Unmapped,
    Pending { mode: MapMode, generation: u64 },
    Mapped(MapMode),
    /// Creation failed; never mapped.
    Invalid,
    Destroyed,
}

pub(super) struct ShadowBuffer {
    pub(super) device: u64,
    pub(super) descriptor: BufferDescriptor,
    buffer: wgpu::Buffer,
    shadow: Box<[u8]>,
    state: ShadowState,
    pending: Option<MapCallback>,
    generation: u64,
}

fn mapping_of(shadow: &mut [u8]) -> NativeMapping {
    let len = shadow.len();
    //SAFETY: the shadow is not reallocated or touched by the driver while mapped
    unsafe { NativeMapping::new(NonNull::from(shadow).cast::<u8>(), len) }
}

//wgpu wants mapped sizes rounded up to COPY_BUFFER_ALIGNMENT, and no empty slices
fn aligned_size(size: u64) -> u64 {
    size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT).max(1) * wgpu::COPY_BUFFER_ALIGNMENT
}

impl ShadowBuffer {
    /// Creates the wgpu buffer and its shadow.
    ///
    /// A buffer the device cannot back is still returned, in a state where
    /// every map request is rejected, together with the error to report.
    pub(super) fn new(
        device: &wgpu::Device,
        device_id: u64,
        descriptor: &BufferDescriptor,
    ) -> Result<(Self, Option<NativeMapping>), (Self, ErrorCategory, String)> {
        let limit = device.limits().max_buffer_size;
        if descriptor.size > limit {
            let message = format!(
                "createBuffer: buffer of {} bytes exceeds the device limit of {limit}",
                descriptor.size
            );
            return Err((Self::unbacked(device, device_id, descriptor), ErrorCategory::OutOfMemory, message));
        }
        let mut shadow = Vec::<u8>::new();
        let reserved = usize::try_from(descriptor.size)
            .ok()
            .filter(|len| shadow.try_reserve_exact(*len).is_ok());
        let Some(len) = reserved else {
            let message = format!("createBuffer: cannot allocate {} bytes of host memory", descriptor.size);
            return Err((Self::unbacked(device, device_id, descriptor), ErrorCategory::OutOfMemory, message));
        };
        shadow.resize(len, 0);

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: aligned_size(descriptor.size),
            usage: super::pixel_format::buffer_usage(descriptor.usage),
            mapped_at_creation: descriptor.mapped_at_creation,
        });
        let mut shadow = ShadowBuffer {
            device: device_id,
            descriptor: descriptor.clone(),
            buffer,
            shadow: shadow.into_boxed_slice(),
            state: ShadowState::Unmapped,
            pending: None,
            generation: 0,
        };
        let mapping = descriptor.mapped_at_creation.then(|| {
            shadow.state = ShadowState::Mapped(MapMode::Write);
            mapping_of(&mut shadow.shadow)
        });
        Ok((shadow, mapping))
    }

    /// A placeholder for a buffer that failed creation. It owns a minimal wgpu buffer and no shadow.
    fn unbacked(device: &wgpu::Device, device_id: u64, descriptor: &BufferDescriptor) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::COPY_BUFFER_ALIGNMENT,
            usage: wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ShadowBuffer {
            device: device_id,
            descriptor: descriptor.clone(),
            buffer,
            shadow: Box::default(),
            state: ShadowState::Invalid,
            pending: None,
            generation: 0,
        }
    }

    pub(super) fn wgpu_buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Starts a map request. Returns the callback back if the request is invalid.
    pub(super) fn map_async(
        &mut self,
        id: u64,
        mode: MapMode,
        callback: MapCallback,
        completions: &Arc<Mutex<Vec<Completion>>>,
    ) -> Result<(), (MapCallback, String)> {
        if self.state != ShadowState::Unmapped {
            return Err((callback, format!("buffer cannot be mapped while {:?}", self.state)));
        }
        self.generation += 1;
        let generation = self.generation;
        self.state = ShadowState::Pending { mode, generation };
        self.pending = Some(callback);
        let wgpu_mode = match mode {
            MapMode::Read => wgpu::MapMode::Read,
            MapMode::Write => wgpu::MapMode::Write,
        };
        let completions = completions.clone();
        self.buffer.slice(..).map_async(wgpu_mode, move |result| {
            lock(&completions).push(Completion::Map {
                buffer: id,
                generation,
                ok: result.is_ok(),
            });
        });
        Ok(())
    }

    /// Finishes the request `generation`, if it is still the outstanding one.
    pub(super) fn complete(&mut self, generation: u64, ok: bool) -> Option<(MapCallback, MapOutcome)> {
        let ShadowState::Pending {
            mode,
            generation: pending,
        } = self.state
        else {
            return None;
        };
        if pending != generation {
            return None;
        }
        let callback = self.pending.take()?;
        if !ok {
            self.state = ShadowState::Unmapped;
            return Some((callback, Err(MapAsyncStatus::Error)));
        }
        {
            let range = self.buffer.slice(..).get_mapped_range();
            let len = self.shadow.len();
            self.shadow.copy_from_slice(&range[..len]);
        }
        if mode == MapMode::Read {
            self.buffer.unmap();
        }
        self.state = ShadowState::Mapped(mode);
        Some((callback, Ok(mapping_of(&mut self.shadow))))
    }

    /// Unmaps, returning the aborted request's callback if one was outstanding.
    pub(super) fn unmap(&mut self) -> Option<MapCallback> {
        match self.state {
            ShadowState::Pending { .. } => {
                //cancels the wgpu request; its completion is ignored by generation
                self.buffer.unmap();
                self.state = ShadowState::Unmapped;
                self.pending.take()
            }
            ShadowState::Mapped(MapMode::Write) => {
                {
                    let mut range = self.buffer.slice(..).get_mapped_range_mut();
                    let len = self.shadow.len();
                    range[..len].copy_from_slice(&self.shadow);
                }
                self.buffer.unmap();
                self.state = ShadowState::Unmapped;
                None
            }
            ShadowState::Mapped(MapMode::Read) => {
                self.state = ShadowState::Unmapped;
                None
            }
            ShadowState::Unmapped | ShadowState::Invalid | ShadowState::Destroyed => None,
        }
    }

    /// Destroys the wgpu buffer, returning an outstanding request's callback.
    pub(super) fn destroy(&mut self) -> Option<MapCallback> {
        let pending = self.pending.take();
        self.state = ShadowState::Destroyed;
        self.shadow = Box::default();
        self.buffer.destroy();
        pending
    }

    pub(super) fn take_pending(&mut self) -> Option<MapCallback> {
        self.pending.take()
    }
}
