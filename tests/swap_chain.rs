// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Canvas contexts, swap chains and the frames they hand out.

use host_gpu::descriptors::{AdapterOptions, DeviceDescriptor, Extent3d, TextureFormat, TextureUsage};
use host_gpu::host::{HostClass, HostValue};
use host_gpu::{
    BridgeConfig, CanvasContext, Device, EntryPoint, ErrorCategory, ResourceKind, SoftDriver, SoftDriverOptions,
    SurfaceTarget, SwapChain, SwapChainDescriptor,
};
use std::sync::{Arc, Mutex};
use test_executors::async_test;

async fn device_on(driver: &Arc<SoftDriver>) -> Device {
    let entry_point = EntryPoint::with_driver(driver.clone(), BridgeConfig::default());
    let adapter = entry_point
        .request_adapter(&AdapterOptions::default())
        .await
        .expect("adapter");
    adapter
        .request_device(&DeviceDescriptor::default())
        .await
        .expect("device")
}

fn headless(width: u32, height: u32) -> CanvasContext {
    CanvasContext::new(SurfaceTarget::Headless { width, height })
}

#[async_test]
async fn preferred_format_comes_from_the_driver() {
    let driver = Arc::new(SoftDriver::with_options(SoftDriverOptions {
        preferred_format: TextureFormat::Rgba8Unorm,
        ..SoftDriverOptions::default()
    }));
    let device = device_on(&driver).await;
    let format = headless(1, 1)
        .preferred_swap_chain_format(&device)
        .await
        .expect("format");
    assert_eq!(format, TextureFormat::Rgba8Unorm);
}

#[async_test]
async fn frames_match_the_canvas_and_configuration() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver).await;
    let canvas = headless(640, 480);
    let swap_chain = canvas
        .configure_swap_chain(&SwapChainDescriptor::new(&device, TextureFormat::Bgra8Unorm))
        .expect("swap chain");
    assert_eq!(swap_chain.format(), TextureFormat::Bgra8Unorm);
    assert_eq!(swap_chain.usage(), TextureUsage::OUTPUT_ATTACHMENT);

    let frame = swap_chain.get_current_texture().expect("frame");
    assert_eq!(frame.size(), Extent3d::new(640, 480));
    assert_eq!(frame.format(), TextureFormat::Bgra8Unorm);
    assert_eq!(frame.device(), &device);
    assert!(frame.swap_chain().is_some());
    //the driver agrees
    let seen = frame.descriptor().expect("driver knows the frame");
    assert_eq!(seen.size, Extent3d::new(640, 480));
}

#[async_test]
async fn presenting_counts_frames() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver).await;
    let swap_chain = headless(8, 8)
        .configure_swap_chain(&SwapChainDescriptor::new(&device, TextureFormat::Bgra8Unorm))
        .expect("swap chain");
    for _ in 0..3 {
        let _frame = swap_chain.get_current_texture().expect("frame");
        swap_chain.present();
    }
    assert_eq!(driver.presented_frames(swap_chain.native_handle()), 3);
}

#[async_test]
async fn presenting_without_a_frame_is_a_validation_error() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver).await;
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    device.on_uncaptured_error(move |category: ErrorCategory, message: &str| {
        sink.lock().unwrap().push((category, message.to_string()));
    });
    let swap_chain = headless(8, 8)
        .configure_swap_chain(&SwapChainDescriptor::new(&device, TextureFormat::Bgra8Unorm))
        .expect("swap chain");
    swap_chain.present();
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, ErrorCategory::Validation);
}

#[async_test]
async fn unpresentable_formats_are_reported() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver).await;
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    device.on_uncaptured_error(move |_: ErrorCategory, message: &str| {
        sink.lock().unwrap().push(message.to_string());
    });
    let _swap_chain = headless(8, 8)
        .configure_swap_chain(&SwapChainDescriptor::new(&device, TextureFormat::Depth32Float))
        .expect("swap chain object is still created");
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert!(received[0].contains("depth32float"), "{}", received[0]);
}

#[async_test]
async fn frames_keep_their_swap_chain_alive() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver).await;
    let swap_chain = headless(8, 8)
        .configure_swap_chain(&SwapChainDescriptor::new(&device, TextureFormat::Bgra8Unorm))
        .expect("swap chain");
    let frame = swap_chain.get_current_texture().expect("frame");
    drop(swap_chain);
    drop(device);
    assert_eq!(driver.stats().kind(ResourceKind::SwapChain).released, 0);

    frame.destroy();
    assert!(frame.is_destroyed());
    drop(frame);
    let stats = driver.stats();
    assert_eq!(stats.kind(ResourceKind::SwapChain).released, 1);
    assert_eq!(stats.live(), 0);
    assert_eq!(stats.double_releases(), 0);
}

#[async_test]
async fn swap_chains_from_host_arguments() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver).await;
    let canvas = headless(4, 4);
    let descriptor = HostValue::object()
        .with("device", device.to_host())
        .with("format", HostValue::from("rgba8unorm"))
        .with("usage", HostValue::Number((TextureUsage::OUTPUT_ATTACHMENT | TextureUsage::COPY_SRC).bits().into()));
    let swap_chain = SwapChain::from_host(&canvas.to_host(), &descriptor).expect("swap chain");
    assert_eq!(swap_chain.format(), TextureFormat::Rgba8Unorm);
    assert!(swap_chain.usage().contains(TextureUsage::COPY_SRC));

    //a device is not a canvas
    assert!(SwapChain::from_host(&device.to_host(), &descriptor).is_err());
    assert_eq!(driver.stats().kind(ResourceKind::SwapChain).created, 1);
}
