// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Descriptor translations into wgpu's vocabulary.

use crate::descriptors::{BufferUsage, PowerPreference, TextureDimension, TextureFormat, TextureUsage};

pub(super) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24Plus => wgpu::TextureFormat::Depth24Plus,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

pub(super) fn texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut wgpu_usage = wgpu::TextureUsages::empty();
    for (ours, theirs) in [
        (TextureUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
        (TextureUsage::COPY_DST, wgpu::TextureUsages::COPY_DST),
        (TextureUsage::SAMPLED, wgpu::TextureUsages::TEXTURE_BINDING),
        (TextureUsage::STORAGE, wgpu::TextureUsages::STORAGE_BINDING),
        (TextureUsage::OUTPUT_ATTACHMENT, wgpu::TextureUsages::RENDER_ATTACHMENT),
    ] {
        if usage.contains(ours) {
            wgpu_usage |= theirs;
        }
    }
    wgpu_usage
}

/// `RAY_TRACING` has no wgpu counterpart and is dropped.
pub(super) fn buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut wgpu_usage = wgpu::BufferUsages::empty();
    for (ours, theirs) in [
        (BufferUsage::MAP_READ, wgpu::BufferUsages::MAP_READ),
        (BufferUsage::MAP_WRITE, wgpu::BufferUsages::MAP_WRITE),
        (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::INDIRECT, wgpu::BufferUsages::INDIRECT),
    ] {
        if usage.contains(ours) {
            wgpu_usage |= theirs;
        }
    }
    wgpu_usage
}

pub(super) fn texture_dimension(dimension: TextureDimension) -> wgpu::TextureDimension {
    match dimension {
        TextureDimension::D1 => wgpu::TextureDimension::D1,
        TextureDimension::D2 => wgpu::TextureDimension::D2,
        TextureDimension::D3 => wgpu::TextureDimension::D3,
    }
}

pub(super) fn power_preference(preference: PowerPreference) -> wgpu::PowerPreference {
    match preference {
        PowerPreference::Default => wgpu::PowerPreference::default(),
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    }
}
