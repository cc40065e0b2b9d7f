// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Ray-tracing acceleration containers.

A bottom-level container is built from triangle geometries that live in
buffers; a top-level container places instances of bottom-level containers.
Each container keeps the buffers and containers it was built from alive for as
long as it lives.
*/

use crate::descriptors::{
    AccelerationContainerFlags, AccelerationContainerLevel, IndexFormat, InstanceFlags, Transform,
    VertexFormat,
};
use crate::error::Error;
use crate::host::{HostClass, HostValue, ObjectReader, expect_object};
use crate::imp::{
    AccelerationContainerHandle, NativeAccelerationContainerDescriptor, NativeGeometry,
    NativeIndexData, NativeInstance,
};
use crate::objects::{Buffer, Device};
use crate::ownership::Owned;
use std::sync::Arc;

/// Index data of a triangle geometry.
#[derive(Debug, Clone)]
pub struct IndexData {
    pub buffer: Buffer,
    pub format: IndexFormat,
    pub count: u32,
}

/// One triangle geometry of a bottom-level container.
#[derive(Debug, Clone)]
pub struct GeometryDescriptor {
    pub vertex_buffer: Buffer,
    pub vertex_format: VertexFormat,
    pub vertex_stride: u32,
    pub vertex_count: u32,
    pub index: Option<IndexData>,
}

impl GeometryDescriptor {
    /// Tightly packed `float3` vertices without indices.
    pub fn triangles(vertex_buffer: &Buffer, vertex_count: u32) -> Self {
        GeometryDescriptor {
            vertex_buffer: vertex_buffer.clone(),
            vertex_format: VertexFormat::Float3,
            vertex_stride: VertexFormat::Float3.byte_size(),
            vertex_count,
            index: None,
        }
    }

    pub fn with_indices(mut self, buffer: &Buffer, format: IndexFormat, count: u32) -> Self {
        self.index = Some(IndexData {
            buffer: buffer.clone(),
            format,
            count,
        });
        self
    }

    fn from_host(value: &HostValue, path: &str) -> Result<Self, Error> {
        let reader = ObjectReader::new(
            value,
            path,
            &[
                "type",
                "vertexBuffer",
                "vertexFormat",
                "vertexStride",
                "vertexCount",
                "indexBuffer",
                "indexFormat",
                "indexCount",
            ],
        )?;
        let vertex_buffer = reader.object::<Buffer>("vertexBuffer")?;
        let index_buffer = reader.optional_object::<Buffer>("indexBuffer")?;
        if let Some(kind) = reader.optional_data::<String>("type")? {
            if kind != "triangles" {
                return Err(Error::decode(
                    reader.field_path("type"),
                    format!("unknown geometry type `{kind}`, expected `triangles`"),
                ));
            }
        }
        let vertex_format = reader
            .optional_data("vertexFormat")?
            .unwrap_or(VertexFormat::Float3);
        let vertex_stride = reader
            .optional_data("vertexStride")?
            .unwrap_or(vertex_format.byte_size());
        let vertex_count = reader.data("vertexCount")?;
        let index = match index_buffer {
            Some(buffer) => Some(IndexData {
                buffer,
                format: reader
                    .optional_data("indexFormat")?
                    .unwrap_or(IndexFormat::Uint32),
                count: reader.data("indexCount")?,
            }),
            None => None,
        };
        Ok(GeometryDescriptor {
            vertex_buffer,
            vertex_format,
            vertex_stride,
            vertex_count,
            index,
        })
    }

    fn to_native(&self) -> NativeGeometry {
        NativeGeometry {
            vertex_buffer: self.vertex_buffer.native_handle(),
            vertex_format: self.vertex_format,
            vertex_stride: self.vertex_stride,
            vertex_count: self.vertex_count,
            index: self.index.as_ref().map(|index| NativeIndexData {
                buffer: index.buffer.native_handle(),
                format: index.format,
                count: index.count,
            }),
        }
    }
}

/// One instance of a top-level container.
#[derive(Debug, Clone)]
pub struct InstanceDescriptor {
    pub geometry_container: AccelerationContainer,
    pub flags: InstanceFlags,
    pub mask: u8,
    pub instance_id: u32,
    pub instance_offset: u32,
    pub transform: Transform,
}

impl InstanceDescriptor {
    pub fn new(geometry_container: &AccelerationContainer) -> Self {
        InstanceDescriptor {
            geometry_container: geometry_container.clone(),
            flags: InstanceFlags::empty(),
            mask: 0xFF,
            instance_id: 0,
            instance_offset: 0,
            transform: Transform::default(),
        }
    }

    fn from_host(value: &HostValue, path: &str) -> Result<Self, Error> {
        let reader = ObjectReader::new(
            value,
            path,
            &[
                "geometryContainer",
                "flags",
                "mask",
                "instanceId",
                "instanceOffset",
                "transform",
            ],
        )?;
        let geometry_container = reader.object::<AccelerationContainer>("geometryContainer")?;
        Ok(InstanceDescriptor {
            geometry_container,
            flags: reader.optional_data("flags")?.unwrap_or_default(),
            mask: reader.optional_data("mask")?.unwrap_or(0xFF),
            instance_id: reader.optional_data("instanceId")?.unwrap_or(0),
            instance_offset: reader.optional_data("instanceOffset")?.unwrap_or(0),
            transform: reader.optional_data("transform")?.unwrap_or_default(),
        })
    }

    fn to_native(&self) -> NativeInstance {
        NativeInstance {
            geometry_container: self.geometry_container.native_handle(),
            flags: self.flags,
            mask: self.mask,
            instance_id: self.instance_id,
            instance_offset: self.instance_offset,
            transform: self.transform,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccelerationContainerDescriptor {
    pub level: AccelerationContainerLevel,
    pub flags: AccelerationContainerFlags,
    pub geometries: Vec<GeometryDescriptor>,
    pub instances: Vec<InstanceDescriptor>,
}

impl AccelerationContainerDescriptor {
    const NAME: &'static str = "GPURayTracingAccelerationContainerDescriptor";

    pub fn bottom(geometries: Vec<GeometryDescriptor>) -> Self {
        AccelerationContainerDescriptor {
            level: AccelerationContainerLevel::Bottom,
            flags: AccelerationContainerFlags::empty(),
            geometries,
            instances: Vec::new(),
        }
    }

    pub fn top(instances: Vec<InstanceDescriptor>) -> Self {
        AccelerationContainerDescriptor {
            level: AccelerationContainerLevel::Top,
            flags: AccelerationContainerFlags::empty(),
            geometries: Vec::new(),
            instances,
        }
    }

    pub fn with_flags(mut self, flags: AccelerationContainerFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Decodes `{ level, flags?, geometries?, instances? }`.
    ///
    /// Object references are checked before any plain field is decoded.
    pub fn from_host(value: &HostValue) -> Result<Self, Error> {
        let reader = ObjectReader::new(value, Self::NAME, &["level", "flags", "geometries", "instances"])?;
        let geometries = reader
            .array("geometries")?
            .into_iter()
            .map(|(path, value)| GeometryDescriptor::from_host(value, &path))
            .collect::<Result<Vec<_>, _>>()?;
        let instances = reader
            .array("instances")?
            .into_iter()
            .map(|(path, value)| InstanceDescriptor::from_host(value, &path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AccelerationContainerDescriptor {
            level: reader.data("level")?,
            flags: reader.optional_data("flags")?.unwrap_or_default(),
            geometries,
            instances,
        })
    }

    fn to_native(&self) -> NativeAccelerationContainerDescriptor {
        NativeAccelerationContainerDescriptor {
            level: self.level,
            flags: self.flags,
            geometries: self.geometries.iter().map(GeometryDescriptor::to_native).collect(),
            instances: self.instances.iter().map(InstanceDescriptor::to_native).collect(),
        }
    }
}

#[derive(Debug)]
struct ContainerInner {
    native: Owned<AccelerationContainerHandle>,
    device: Device,
    //holds the geometry buffers and instanced containers alive
    descriptor: AccelerationContainerDescriptor,
}

/// A ray-tracing acceleration container.
#[derive(Debug, Clone)]
pub struct AccelerationContainer(Arc<ContainerInner>);

impl AccelerationContainer {
    pub(crate) fn new(device: &Device, descriptor: &AccelerationContainerDescriptor) -> Result<Self, Error> {
        let driver = device.driver().clone();
        let handle = driver.create_acceleration_container(device.native_handle(), &descriptor.to_native())?;
        logwise::info_sync!(
            "created {level} acceleration container with {geometries} geometries, {instances} instances",
            level = logwise::privacy::LogIt(&descriptor.level),
            geometries = descriptor.geometries.len(),
            instances = descriptor.instances.len()
        );
        Ok(AccelerationContainer(Arc::new(ContainerInner {
            native: Owned::new(handle, driver),
            device: device.clone(),
            descriptor: descriptor.clone(),
        })))
    }

    /// Creates a container from host arguments; `device` is checked first.
    pub fn from_host(device: &HostValue, descriptor: &HostValue) -> Result<Self, Error> {
        let device = expect_object::<Device>(device, "GPURayTracingAccelerationContainer: argument 0")?;
        device.create_acceleration_container_from_host(descriptor)
    }

    pub fn device(&self) -> &Device {
        &self.0.device
    }

    pub fn level(&self) -> AccelerationContainerLevel {
        self.0.descriptor.level
    }

    pub fn flags(&self) -> AccelerationContainerFlags {
        self.0.descriptor.flags
    }

    pub fn geometry_count(&self) -> usize {
        self.0.descriptor.geometries.len()
    }

    pub fn instance_count(&self) -> usize {
        self.0.descriptor.instances.len()
    }

    pub fn descriptor(&self) -> &AccelerationContainerDescriptor {
        &self.0.descriptor
    }

    pub fn native_handle(&self) -> AccelerationContainerHandle {
        self.0.native.handle()
    }
}

impl PartialEq for AccelerationContainer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl HostClass for AccelerationContainer {
    const CLASS_NAME: &'static str = "GPURayTracingAccelerationContainer";
}
