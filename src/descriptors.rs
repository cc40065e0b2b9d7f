// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Descriptors: structured configuration for creating native resources.
//!
//! Plain-data descriptors decode from host values through serde, with the
//! host's camelCase field names. Unknown fields and missing required fields
//! fail at decode time. Descriptors that reference other wrapper objects
//! (swap chains, acceleration containers) live next to the objects they create.

use crate::error::Error;
use crate::host::{HostValue, decode_data};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

macro_rules! bits_serde {
    ($flags:ty, $what:literal) => {
        impl Serialize for $flags {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u32(self.bits())
            }
        }

        impl<'de> Deserialize<'de> for $flags {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let bits = u32::deserialize(deserializer)?;
                <$flags>::from_bits(bits).ok_or_else(|| {
                    serde::de::Error::custom(format!(concat!("unknown ", $what, " bits {:#x}"), bits))
                })
            }
        }
    };
}

bitflags::bitflags! {
    /// How a buffer may be used. Host values pass these as a number.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const MAP_READ = 0x0001;
        const MAP_WRITE = 0x0002;
        const COPY_SRC = 0x0004;
        const COPY_DST = 0x0008;
        const INDEX = 0x0010;
        const VERTEX = 0x0020;
        const UNIFORM = 0x0040;
        const STORAGE = 0x0080;
        const INDIRECT = 0x0100;
        const RAY_TRACING = 0x0200;
    }
}
bits_serde!(BufferUsage, "buffer usage");

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 0x01;
        const COPY_DST = 0x02;
        const SAMPLED = 0x04;
        const STORAGE = 0x08;
        const OUTPUT_ATTACHMENT = 0x10;
    }
}
bits_serde!(TextureUsage, "texture usage");

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccelerationContainerFlags: u32 {
        const ALLOW_UPDATE = 0x1;
        const PREFER_FAST_TRACE = 0x2;
        const PREFER_FAST_BUILD = 0x4;
        const LOW_MEMORY = 0x8;
    }
}
bits_serde!(AccelerationContainerFlags, "acceleration container flag");

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstanceFlags: u32 {
        const TRIANGLE_CULL_DISABLE = 0x1;
        const TRIANGLE_FRONT_COUNTERCLOCKWISE = 0x2;
        const FORCE_OPAQUE = 0x4;
        const FORCE_NO_OPAQUE = 0x8;
    }
}
bits_serde!(InstanceFlags, "acceleration instance flag");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    #[serde(rename = "r8unorm")]
    R8Unorm,
    #[serde(rename = "rg8unorm")]
    Rg8Unorm,
    #[serde(rename = "rgba8unorm")]
    Rgba8Unorm,
    #[serde(rename = "rgba8unorm-srgb")]
    Rgba8UnormSrgb,
    #[serde(rename = "bgra8unorm")]
    Bgra8Unorm,
    #[serde(rename = "bgra8unorm-srgb")]
    Bgra8UnormSrgb,
    #[serde(rename = "r32float")]
    R32Float,
    #[serde(rename = "rg32float")]
    Rg32Float,
    #[serde(rename = "rgba16float")]
    Rgba16Float,
    #[serde(rename = "rgba32float")]
    Rgba32Float,
    #[serde(rename = "depth32float")]
    Depth32Float,
    #[serde(rename = "depth24plus")]
    Depth24Plus,
    #[serde(rename = "depth24plus-stencil8")]
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// The host's name for this format.
    pub fn as_str(self) -> &'static str {
        match self {
            TextureFormat::R8Unorm => "r8unorm",
            TextureFormat::Rg8Unorm => "rg8unorm",
            TextureFormat::Rgba8Unorm => "rgba8unorm",
            TextureFormat::Rgba8UnormSrgb => "rgba8unorm-srgb",
            TextureFormat::Bgra8Unorm => "bgra8unorm",
            TextureFormat::Bgra8UnormSrgb => "bgra8unorm-srgb",
            TextureFormat::R32Float => "r32float",
            TextureFormat::Rg32Float => "rg32float",
            TextureFormat::Rgba16Float => "rgba16float",
            TextureFormat::Rgba32Float => "rgba32float",
            TextureFormat::Depth32Float => "depth32float",
            TextureFormat::Depth24Plus => "depth24plus",
            TextureFormat::Depth24PlusStencil8 => "depth24plus-stencil8",
        }
    }

    /// Whether a swap chain may present this format.
    pub fn is_presentable(self) -> bool {
        matches!(
            self,
            TextureFormat::Bgra8Unorm
                | TextureFormat::Bgra8UnormSrgb
                | TextureFormat::Rgba8Unorm
                | TextureFormat::Rgba8UnormSrgb
                | TextureFormat::Rgba16Float
        )
    }
}

impl std::fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureDimension {
    #[serde(rename = "1d")]
    D1,
    #[default]
    #[serde(rename = "2d")]
    D2,
    #[serde(rename = "3d")]
    D3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VertexFormat {
    Float2,
    Float3,
    Float4,
}

impl VertexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccelerationContainerLevel {
    Bottom,
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    Default,
    LowPower,
    HighPerformance,
}

/// Descriptors that cross the host boundary as plain data.
pub trait HostDescriptor: Serialize + DeserializeOwned {
    /// Name used as the root of decode error paths.
    const NAME: &'static str;

    fn from_host(value: &HostValue) -> Result<Self, Error> {
        decode_data(value, Self::NAME)
    }

    /// Re-encodes the descriptor with host field names.
    fn to_host(&self) -> Result<HostValue, Error> {
        serde_json::to_value(self)
            .map(HostValue::from)
            .map_err(|e| Error::decode(Self::NAME, e.to_string()))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn one() -> u32 {
    1
}

fn is_one(value: &u32) -> bool {
    *value == 1
}

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BufferDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    #[serde(default, skip_serializing_if = "is_false")]
    pub mapped_at_creation: bool,
}

impl BufferDescriptor {
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        BufferDescriptor {
            label: None,
            size,
            usage,
            mapped_at_creation: false,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn mapped_at_creation(mut self) -> Self {
        self.mapped_at_creation = true;
        self
    }
}

impl HostDescriptor for BufferDescriptor {
    const NAME: &'static str = "GPUBufferDescriptor";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub depth: u32,
}

impl Extent3d {
    pub fn new(width: u32, height: u32) -> Self {
        Extent3d {
            width,
            height,
            depth: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TextureDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub size: Extent3d,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    #[serde(default, skip_serializing_if = "is_default")]
    pub dimension: TextureDimension,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub mip_level_count: u32,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub sample_count: u32,
}

impl TextureDescriptor {
    pub fn new(size: Extent3d, format: TextureFormat, usage: TextureUsage) -> Self {
        TextureDescriptor {
            label: None,
            size,
            format,
            usage,
            dimension: TextureDimension::D2,
            mip_level_count: 1,
            sample_count: 1,
        }
    }
}

impl HostDescriptor for TextureDescriptor {
    const NAME: &'static str = "GPUTextureDescriptor";
}

/// Optional device capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Extensions {
    pub anisotropic_filtering: bool,
    pub ray_tracing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Limits {
    pub max_bind_groups: u32,
    pub max_buffer_size: u64,
    pub max_texture_dimension_2d: u32,
    pub max_uniform_buffer_binding_size: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_bind_groups: 4,
            max_buffer_size: 256 << 20,
            max_texture_dimension_2d: 8192,
            max_uniform_buffer_binding_size: 64 << 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct DeviceDescriptor {
    pub extensions: Extensions,
    pub limits: Limits,
}

impl HostDescriptor for DeviceDescriptor {
    const NAME: &'static str = "GPUDeviceDescriptor";

    /// A missing descriptor means the defaults.
    fn from_host(value: &HostValue) -> Result<Self, Error> {
        if value.is_nullish() {
            return Ok(DeviceDescriptor::default());
        }
        decode_data(value, Self::NAME)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct AdapterOptions {
    pub power_preference: PowerPreference,
    pub force_fallback_adapter: bool,
}

impl HostDescriptor for AdapterOptions {
    const NAME: &'static str = "GPURequestAdapterOptions";

    fn from_host(value: &HostValue) -> Result<Self, Error> {
        if value.is_nullish() {
            return Ok(AdapterOptions::default());
        }
        decode_data(value, Self::NAME)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Placement of an acceleration container instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Transform {
            translation: Vec3::default(),
            rotation: Vec3::default(),
            scale: Vec3 {
                x: 1.0,
                y: 1.0,
                z: 1.0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn buffer_descriptor_decodes_usage_bits() {
        let value = HostValue::from(json!({"size": 64, "usage": 0x2 | 0x4}));
        let descriptor = BufferDescriptor::from_host(&value).unwrap();
        assert_eq!(descriptor.size, 64);
        assert_eq!(descriptor.usage, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC);
        assert!(!descriptor.mapped_at_creation);
    }

    #[test]
    fn missing_and_unknown_fields_fail() {
        let missing = HostValue::from(json!({"usage": 8}));
        match BufferDescriptor::from_host(&missing) {
            Err(Error::Decode { path, message }) => {
                assert_eq!(path, "GPUBufferDescriptor");
                assert!(message.contains("size"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
        let unknown = HostValue::from(json!({"size": 4, "usage": 8, "colour": "red"}));
        assert!(matches!(
            BufferDescriptor::from_host(&unknown),
            Err(Error::Decode { .. })
        ));
        let bad_bits = HostValue::from(json!({"size": 4, "usage": 0x8000}));
        assert!(matches!(
            BufferDescriptor::from_host(&bad_bits),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn texture_descriptor_defaults() {
        let value = HostValue::from(json!({
            "size": {"width": 4, "height": 2},
            "format": "rgba8unorm-srgb",
            "usage": 0x4
        }));
        let descriptor = TextureDescriptor::from_host(&value).unwrap();
        assert_eq!(descriptor.size, Extent3d::new(4, 2));
        assert_eq!(descriptor.format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(descriptor.dimension, TextureDimension::D2);
        assert_eq!(descriptor.mip_level_count, 1);
        assert_eq!(
            descriptor.to_host().unwrap().to_json("t").unwrap(),
            json!({
                "size": {"width": 4, "height": 2},
                "format": "rgba8unorm-srgb",
                "usage": 4
            })
        );
    }

    #[test]
    fn device_descriptor_may_be_absent() {
        let descriptor = DeviceDescriptor::from_host(&HostValue::Undefined).unwrap();
        assert_eq!(descriptor, DeviceDescriptor::default());
        let value = HostValue::from(json!({"extensions": {"rayTracing": true}}));
        let descriptor = DeviceDescriptor::from_host(&value).unwrap();
        assert!(descriptor.extensions.ray_tracing);
        assert_eq!(descriptor.limits, Limits::default());
    }
}
