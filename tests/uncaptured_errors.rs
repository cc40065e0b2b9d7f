// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Out-of-band driver errors reach the device's single subscriber.

use host_gpu::descriptors::{AdapterOptions, BufferDescriptor, BufferUsage, DeviceDescriptor};
use host_gpu::{BridgeConfig, Device, EntryPoint, ErrorCategory, SoftDriver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Received = Arc<Mutex<Vec<(ErrorCategory, String)>>>;

fn device_on(driver: &Arc<SoftDriver>) -> Device {
    let entry_point = EntryPoint::with_driver(driver.clone(), BridgeConfig::default());
    test_executors::spin_on(async {
        let adapter = entry_point
            .request_adapter(&AdapterOptions::default())
            .await
            .expect("adapter");
        adapter
            .request_device(&DeviceDescriptor::default())
            .await
            .expect("device")
    })
}

fn collector() -> (Received, impl Fn(ErrorCategory, &str) + Send + Sync + 'static) {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    (received, move |category: ErrorCategory, message: &str| {
        sink.lock().unwrap().push((category, message.to_string()));
    })
}

#[test]
fn injected_errors_arrive_on_tick_with_their_label() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let (received, callback) = collector();
    let _subscription = device.on_uncaptured_error(callback);

    driver.inject_error(device.native_handle(), ErrorCategory::OutOfMemory, "heap exhausted");
    driver.inject_error(device.native_handle(), ErrorCategory::DeviceLost, "gone");
    driver.inject_error(device.native_handle(), ErrorCategory::Unknown, "???");
    assert!(received.lock().unwrap().is_empty());

    device.tick();
    let received = received.lock().unwrap();
    assert_eq!(
        *received,
        vec![
            (ErrorCategory::OutOfMemory, "Out of memory Error: heap exhausted".to_string()),
            (ErrorCategory::DeviceLost, "Device lost Error: gone".to_string()),
            (ErrorCategory::Unknown, "Unknown Error: ???".to_string()),
        ]
    );
}

#[test]
fn validation_errors_are_reported_immediately() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let (received, callback) = collector();
    device.on_uncaptured_error(callback);

    let buffer = device
        .create_buffer(&BufferDescriptor::new(4, BufferUsage::COPY_DST))
        .expect("buffer");
    device.queue().write_buffer(&buffer, 2, &[0; 4]);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, ErrorCategory::Validation);
    assert!(received[0].1.starts_with("Validation Error: setSubData:"), "{}", received[0].1);
}

#[test]
fn oversized_buffers_report_out_of_memory() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let (received, callback) = collector();
    device.on_uncaptured_error(callback);

    let limit = device.limits().max_buffer_size;
    let buffer = device
        .create_buffer(&BufferDescriptor::new(limit + 4, BufferUsage::COPY_DST))
        .expect("an invalid buffer is still a buffer");
    assert_eq!(buffer.size(), limit + 4);
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0, ErrorCategory::OutOfMemory);
}

#[test]
fn a_new_subscriber_replaces_the_old_one() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let (first, first_callback) = collector();
    let (second, second_callback) = collector();
    let first_subscription = device.on_uncaptured_error(first_callback);
    let second_subscription = device.on_uncaptured_error(second_callback);
    assert!(!first_subscription.is_active());
    assert!(second_subscription.is_active());

    driver.inject_error(device.native_handle(), ErrorCategory::Validation, "bad");
    device.tick();
    assert!(first.lock().unwrap().is_empty());
    assert_eq!(second.lock().unwrap().len(), 1);

    //a stale subscription cannot remove its replacement
    assert!(!first_subscription.unsubscribe());
    assert!(second_subscription.is_active());
}

#[test]
fn unsubscribing_stops_delivery() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let (received, callback) = collector();
    let subscription = device.on_uncaptured_error(callback);
    assert!(subscription.unsubscribe());

    driver.inject_error(device.native_handle(), ErrorCategory::Validation, "nobody listens");
    device.tick();
    assert!(received.lock().unwrap().is_empty());
}

#[test]
fn clearing_removes_whichever_subscriber_is_installed() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let (received, callback) = collector();
    let subscription = device.on_uncaptured_error(callback);
    device.clear_uncaptured_error();
    assert!(!subscription.is_active());

    driver.inject_error(device.native_handle(), ErrorCategory::Validation, "dropped");
    device.tick();
    assert!(received.lock().unwrap().is_empty());
}

#[test]
fn subscribers_may_call_back_into_the_device() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let calls = Arc::new(AtomicUsize::new(0));
    let reentered = device.clone();
    let counter = calls.clone();
    device.on_uncaptured_error(move |_: ErrorCategory, _: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        //replacing the subscriber from inside a delivery must not deadlock
        reentered.on_uncaptured_error(|_: ErrorCategory, _: &str| {});
        reentered.tick();
    });

    driver.inject_error(device.native_handle(), ErrorCategory::Unknown, "once");
    device.tick();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    //break the device -> callback -> device cycle
    device.clear_uncaptured_error();
}

#[test]
fn subscriptions_outlive_a_dropped_device() {
    let driver = Arc::new(SoftDriver::new());
    let device = device_on(&driver);
    let subscription = device.on_uncaptured_error(|_: ErrorCategory, _: &str| {});
    drop(device);
    assert!(!subscription.is_active());
    assert!(!subscription.unsubscribe());
    assert_eq!(driver.stats().live(), 0);
}

#[cfg(feature = "backend_wgpu")]
#[test]
fn wgpu_reports_buffers_it_cannot_back() {
    use host_gpu::{BackendKind, Error, MapAsyncStatus};
    let config = BridgeConfig {
        backend: BackendKind::Wgpu,
        ..BridgeConfig::default()
    };
    let device = test_executors::spin_on(async {
        let entry_point = EntryPoint::with_config(config).await.expect("wgpu entry point");
        //machines without an adapter have nothing to test
        let adapter = entry_point.request_adapter(&AdapterOptions::default()).await.ok()?;
        adapter.request_device(&DeviceDescriptor::default()).await.ok()
    });
    let Some(device) = device else {
        return;
    };
    let (received, callback) = collector();
    device.on_uncaptured_error(callback);

    let buffer = device
        .create_buffer(&BufferDescriptor::new(u64::MAX & !3, BufferUsage::MAP_READ | BufferUsage::COPY_DST))
        .expect("an unbacked buffer is still a buffer");
    assert!(matches!(buffer.map_read(), Err(Error::MapFailed(MapAsyncStatus::Error))));
    assert!(matches!(
        device.create_buffer_mapped(&BufferDescriptor::new(u64::MAX & !3, BufferUsage::MAP_WRITE)),
        Err(Error::MapFailed(_))
    ));

    let received = received.lock().unwrap();
    assert_eq!(received[0].0, ErrorCategory::OutOfMemory);
    assert!(received[0].1.contains("exceeds the device limit"), "{}", received[0].1);
    assert!(received.iter().any(|(category, _)| *category == ErrorCategory::Validation));
}
