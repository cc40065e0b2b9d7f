// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Ray-tracing acceleration containers: building both levels, validation,
//! and keeping their inputs alive.

use host_gpu::descriptors::{
    AccelerationContainerFlags, AccelerationContainerLevel, AdapterOptions, BufferDescriptor, BufferUsage,
    DeviceDescriptor, Extensions, IndexFormat, InstanceFlags, VertexFormat,
};
use host_gpu::host::{HostClass, HostValue};
use host_gpu::{
    AccelerationContainer, AccelerationContainerDescriptor, BridgeConfig, Buffer, Device, EntryPoint, Error,
    ErrorCategory, GeometryDescriptor, InstanceDescriptor, ResourceKind, SoftDriver,
};
use std::sync::{Arc, Mutex};

fn device_on(driver: &Arc<SoftDriver>, ray_tracing: bool) -> Device {
    let entry_point = EntryPoint::with_driver(driver.clone(), BridgeConfig::default());
    let descriptor = DeviceDescriptor {
        extensions: Extensions {
            ray_tracing,
            ..Extensions::default()
        },
        ..DeviceDescriptor::default()
    };
    test_executors::spin_on(async {
        let adapter = entry_point
            .request_adapter(&AdapterOptions::default())
            .await
            .expect("adapter");
        adapter.request_device(&descriptor).await.expect("device")
    })
}

fn collect_errors(device: &Device) -> Arc<Mutex<Vec<String>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    device.on_uncaptured_error(move |_: ErrorCategory, message: &str| {
        sink.lock().unwrap().push(message.to_string());
    });
    received
}

/// A buffer holding `count` float3 vertices.
fn vertices(device: &Device, count: u64) -> Buffer {
    device
        .create_buffer(&BufferDescriptor::new(count * 12, BufferUsage::RAY_TRACING | BufferUsage::COPY_DST))
        .expect("vertex buffer")
}

fn bottom(device: &Device) -> AccelerationContainer {
    let buffer = vertices(device, 3);
    device
        .create_acceleration_container(&AccelerationContainerDescriptor::bottom(vec![
            GeometryDescriptor::triangles(&buffer, 3),
        ]))
        .expect("bottom-level container")
}

#[test]
fn bottom_and_top_levels_build_cleanly() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, true);
    let errors = collect_errors(&device);

    let geometry = bottom(&device);
    assert_eq!(geometry.level(), AccelerationContainerLevel::Bottom);
    assert_eq!(geometry.geometry_count(), 1);

    let mut instance = InstanceDescriptor::new(&geometry);
    instance.flags = InstanceFlags::FORCE_OPAQUE;
    instance.instance_id = 7;
    let scene = device
        .create_acceleration_container(
            &AccelerationContainerDescriptor::top(vec![instance])
                .with_flags(AccelerationContainerFlags::PREFER_FAST_TRACE),
        )
        .expect("top-level container");
    assert_eq!(scene.level(), AccelerationContainerLevel::Top);
    assert_eq!(scene.instance_count(), 1);
    assert_eq!(scene.flags(), AccelerationContainerFlags::PREFER_FAST_TRACE);
    assert_eq!(scene.descriptor().instances[0].geometry_container, geometry);
    assert!(errors.lock().unwrap().is_empty(), "{:?}", errors.lock().unwrap());
}

#[test]
fn indexed_geometry_is_checked_against_its_index_buffer() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, true);
    let errors = collect_errors(&device);
    let vertex_buffer = vertices(&device, 4);
    let index_buffer = device
        .create_buffer(&BufferDescriptor::new(12, BufferUsage::RAY_TRACING | BufferUsage::INDEX))
        .expect("index buffer");

    let fits = GeometryDescriptor::triangles(&vertex_buffer, 4).with_indices(&index_buffer, IndexFormat::Uint32, 3);
    device
        .create_acceleration_container(&AccelerationContainerDescriptor::bottom(vec![fits]))
        .expect("container");
    assert!(errors.lock().unwrap().is_empty());

    let overflows =
        GeometryDescriptor::triangles(&vertex_buffer, 4).with_indices(&index_buffer, IndexFormat::Uint32, 6);
    device
        .create_acceleration_container(&AccelerationContainerDescriptor::bottom(vec![overflows]))
        .expect("container object is still created");
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("index buffer cannot hold 6 indices"), "{}", errors[0]);
}

#[test]
fn containers_need_the_ray_tracing_extension() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, false);
    let errors = collect_errors(&device);
    let _container = bottom(&device);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0].starts_with("Validation Error: createRayTracingAccelerationContainer:"),
        "{}",
        errors[0]
    );
}

#[test]
fn geometry_buffers_need_ray_tracing_usage() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, true);
    let errors = collect_errors(&device);
    let plain = device
        .create_buffer(&BufferDescriptor::new(36, BufferUsage::VERTEX))
        .expect("buffer");
    let _container = device
        .create_acceleration_container(&AccelerationContainerDescriptor::bottom(vec![
            GeometryDescriptor::triangles(&plain, 3),
        ]))
        .expect("container");
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("RAY_TRACING"), "{}", errors[0]);
}

#[test]
fn top_levels_only_instance_bottom_levels() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, true);
    let geometry = bottom(&device);
    let scene = device
        .create_acceleration_container(&AccelerationContainerDescriptor::top(vec![InstanceDescriptor::new(
            &geometry,
        )]))
        .expect("scene");
    let errors = collect_errors(&device);
    let _nested = device
        .create_acceleration_container(&AccelerationContainerDescriptor::top(vec![InstanceDescriptor::new(
            &scene,
        )]))
        .expect("container object is still created");
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("not bottom-level"), "{}", errors[0]);
}

#[test]
fn containers_keep_their_inputs_alive() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, true);
    let geometry = bottom(&device);
    let scene = device
        .create_acceleration_container(&AccelerationContainerDescriptor::top(vec![InstanceDescriptor::new(
            &geometry,
        )]))
        .expect("scene");
    drop(geometry);
    drop(device);
    let stats = driver.stats();
    assert_eq!(stats.kind(ResourceKind::AccelerationContainer).released, 0);
    assert_eq!(stats.kind(ResourceKind::Buffer).released, 0);

    drop(scene);
    let stats = driver.stats();
    assert_eq!(stats.kind(ResourceKind::AccelerationContainer).released, 2);
    assert_eq!(stats.live(), 0);
    assert_eq!(stats.double_releases(), 0);
}

#[test]
fn containers_from_host_arguments() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, true);
    let errors = collect_errors(&device);
    let buffer = vertices(&device, 6);

    let geometry = HostValue::object()
        .with("type", HostValue::from("triangles"))
        .with("vertexBuffer", buffer.to_host())
        .with("vertexCount", HostValue::Number(6.0));
    let descriptor = HostValue::object()
        .with("level", HostValue::from("bottom"))
        .with("geometries", HostValue::Array(vec![geometry]));
    let container =
        AccelerationContainer::from_host(&device.to_host(), &descriptor).expect("bottom-level container");
    let decoded = &container.descriptor().geometries[0];
    assert_eq!(decoded.vertex_format, VertexFormat::Float3);
    assert_eq!(decoded.vertex_stride, 12);
    assert_eq!(decoded.vertex_buffer, buffer);
    assert!(errors.lock().unwrap().is_empty());

    let instance = HostValue::object()
        .with("geometryContainer", container.to_host())
        .with("mask", HostValue::Number(15.0));
    let descriptor = HostValue::object()
        .with("level", HostValue::from("top"))
        .with("instances", HostValue::Array(vec![instance]));
    let scene = device
        .create_acceleration_container_from_host(&descriptor)
        .expect("top-level container");
    assert_eq!(scene.descriptor().instances[0].mask, 15);
}

#[test]
fn host_references_are_checked_before_any_native_work() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver, true);
    let buffer = vertices(&device, 3);

    //the vertex buffer slot holds a device, and the level is misspelled too
    let geometry = HostValue::object()
        .with("vertexBuffer", device.to_host())
        .with("vertexCount", HostValue::Number(3.0));
    let descriptor = HostValue::object()
        .with("level", HostValue::from("middle"))
        .with("geometries", HostValue::Array(vec![geometry]));
    match device.create_acceleration_container_from_host(&descriptor) {
        Err(Error::TypeMismatch { context, expected, .. }) => {
            assert_eq!(
                context,
                "GPURayTracingAccelerationContainerDescriptor.geometries[0].vertexBuffer"
            );
            assert_eq!(expected, "GPUBuffer");
        }
        other => panic!("unexpected {other:?}"),
    }

    let geometry = HostValue::object()
        .with("type", HostValue::from("aabbs"))
        .with("vertexBuffer", buffer.to_host())
        .with("vertexCount", HostValue::Number(3.0));
    let descriptor = HostValue::object()
        .with("level", HostValue::from("bottom"))
        .with("geometries", HostValue::Array(vec![geometry]));
    assert!(matches!(
        device.create_acceleration_container_from_host(&descriptor),
        Err(Error::Decode { .. })
    ));
    assert_eq!(driver.stats().kind(ResourceKind::AccelerationContainer).created, 0);
}
