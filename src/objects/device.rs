// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::config::BridgeConfig;
use crate::descriptors::{
    BufferDescriptor, DeviceDescriptor, Extensions, HostDescriptor, Limits, TextureDescriptor,
};
use crate::error::Error;
use crate::errors::{ErrorCategory, ErrorSink, ErrorSubscription};
use crate::host::{HostClass, HostValue, expect_object};
use crate::imp::{DeviceHandle, Driver, MapAsyncStatus};
use crate::mapping::MappedView;
use crate::objects::{
    AccelerationContainer, AccelerationContainerDescriptor, Adapter, Buffer, Queue, Texture,
};
use crate::ownership::Owned;
use std::sync::Arc;

#[derive(Debug)]
struct DeviceInner {
    native: Owned<DeviceHandle>,
    adapter: Adapter,
    descriptor: DeviceDescriptor,
    errors: Arc<ErrorSink>,
}

/// A logical device. Creates resources and routes the driver's
/// out-of-band errors to a single subscriber.
#[derive(Debug, Clone)]
pub struct Device(Arc<DeviceInner>);

impl Device {
    pub(crate) fn new(adapter: &Adapter, descriptor: &DeviceDescriptor) -> Result<Self, Error> {
        let driver = adapter.driver().clone();
        let handle = driver.create_device(adapter.native_handle(), descriptor)?;
        let native = Owned::new(handle, driver.clone());
        let errors = Arc::new(ErrorSink::new());
        let weak_errors = Arc::downgrade(&errors);
        driver.set_uncaptured_error_callback(
            handle,
            Some(Arc::new(move |category: ErrorCategory, message: &str| {
                if let Some(sink) = weak_errors.upgrade() {
                    sink.deliver(category, message);
                }
            })),
        );
        logwise::info_sync!("created device {id}", id = handle.raw().get());
        Ok(Device(Arc::new(DeviceInner {
            native,
            adapter: adapter.clone(),
            descriptor: descriptor.clone(),
            errors,
        })))
    }

    /// Creates a device from host arguments.
    ///
    /// `adapter` must be a `GPUAdapter`; this is checked before the descriptor
    /// is decoded or the driver is called.
    pub fn from_host(adapter: &HostValue, descriptor: &HostValue) -> Result<Self, Error> {
        let adapter = expect_object::<Adapter>(adapter, "GPUDevice: argument 0")?;
        let descriptor = DeviceDescriptor::from_host(descriptor)?;
        Device::new(&adapter, &descriptor)
    }

    pub fn adapter(&self) -> &Adapter {
        &self.0.adapter
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.0.descriptor
    }

    pub fn extensions(&self) -> &Extensions {
        &self.0.descriptor.extensions
    }

    pub fn limits(&self) -> &Limits {
        &self.0.descriptor.limits
    }

    pub fn native_handle(&self) -> DeviceHandle {
        self.0.native.handle()
    }

    pub fn queue(&self) -> Queue {
        Queue::new(self.clone())
    }

    /// Pumps the driver. Pending map requests, queue completions and
    /// out-of-band errors are delivered from here.
    pub fn tick(&self) {
        logwise::trace_sync!("tick device {id}", id = self.native_handle().raw().get());
        self.driver().device_tick(self.native_handle());
    }

    /// Installs `callback` as the device's error subscriber, replacing any
    /// previous one.
    ///
    /// The callback receives the error category and a message of the form
    /// `"<category label> Error: <native message>"`. It may be called from
    /// whichever thread ticks the device, and it may call back into the device.
    pub fn on_uncaptured_error(
        &self,
        callback: impl Fn(ErrorCategory, &str) + Send + Sync + 'static,
    ) -> ErrorSubscription {
        self.0.errors.subscribe(Arc::new(callback))
    }

    /// Removes the error subscriber, whichever it is.
    pub fn clear_uncaptured_error(&self) {
        self.0.errors.clear();
    }

    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<Buffer, Error> {
        Buffer::new(self, descriptor).map(|(buffer, _)| buffer)
    }

    pub fn create_buffer_from_host(&self, descriptor: &HostValue) -> Result<Buffer, Error> {
        let descriptor = BufferDescriptor::from_host(descriptor)?;
        self.create_buffer(&descriptor)
    }

    /// Creates a buffer already mapped for writing and returns it with its view.
    pub fn create_buffer_mapped(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<(Buffer, MappedView), Error> {
        let mut descriptor = descriptor.clone();
        descriptor.mapped_at_creation = true;
        match Buffer::new(self, &descriptor)? {
            (buffer, Some(view)) => Ok((buffer, view)),
            //the driver reported why through the error subscriber
            (_, None) => Err(Error::MapFailed(MapAsyncStatus::Error)),
        }
    }

    /// Continuation form of [`Device::create_buffer_mapped`].
    ///
    /// `continuation` runs exactly once, before this returns, after every
    /// internal lock has been released.
    pub fn create_buffer_mapped_then<R>(
        &self,
        descriptor: &BufferDescriptor,
        continuation: impl FnOnce(Buffer, MappedView) -> R,
    ) -> Result<R, Error> {
        let (buffer, view) = self.create_buffer_mapped(descriptor)?;
        Ok(continuation(buffer, view))
    }

    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<Texture, Error> {
        Texture::new(self, descriptor)
    }

    pub fn create_texture_from_host(&self, descriptor: &HostValue) -> Result<Texture, Error> {
        let descriptor = TextureDescriptor::from_host(descriptor)?;
        self.create_texture(&descriptor)
    }

    pub fn create_acceleration_container(
        &self,
        descriptor: &AccelerationContainerDescriptor,
    ) -> Result<AccelerationContainer, Error> {
        AccelerationContainer::new(self, descriptor)
    }

    pub fn create_acceleration_container_from_host(
        &self,
        descriptor: &HostValue,
    ) -> Result<AccelerationContainer, Error> {
        let descriptor = AccelerationContainerDescriptor::from_host(descriptor)?;
        self.create_acceleration_container(&descriptor)
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        self.0.native.driver()
    }

    pub(crate) fn config(&self) -> &BridgeConfig {
        self.0.adapter.config()
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl HostClass for Device {
    const CLASS_NAME: &'static str = "GPUDevice";
}
