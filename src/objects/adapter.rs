// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::config::BridgeConfig;
use crate::descriptors::{DeviceDescriptor, HostDescriptor};
use crate::entry_point::EntryPoint;
use crate::error::Error;
use crate::host::{HostClass, HostValue};
use crate::imp::{AdapterHandle, AdapterInfo, Driver};
use crate::objects::Device;
use crate::ownership::Owned;
use std::sync::Arc;

#[derive(Debug)]
struct AdapterInner {
    native: Owned<AdapterHandle>,
    entry_point: EntryPoint,
    info: AdapterInfo,
}

/// A physical adapter, obtained from [`EntryPoint::request_adapter`].
#[derive(Debug, Clone)]
pub struct Adapter(Arc<AdapterInner>);

impl Adapter {
    pub(crate) fn new(entry_point: &EntryPoint, handle: AdapterHandle) -> Result<Self, Error> {
        let driver = entry_point.driver().clone();
        //take ownership first so a failed info query still releases the handle
        let native = Owned::new(handle, driver.clone());
        let info = driver.adapter_info(handle)?;
        logwise::info_sync!(
            "adapter {name} on {backend}",
            name = info.name.clone(),
            backend = info.backend.clone()
        );
        Ok(Adapter(Arc::new(AdapterInner {
            native,
            entry_point: entry_point.clone(),
            info,
        })))
    }

    pub fn info(&self) -> &AdapterInfo {
        &self.0.info
    }

    pub fn name(&self) -> &str {
        &self.0.info.name
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.0.entry_point
    }

    pub fn native_handle(&self) -> AdapterHandle {
        self.0.native.handle()
    }

    pub async fn request_device(&self, descriptor: &DeviceDescriptor) -> Result<Device, Error> {
        Device::new(self, descriptor)
    }

    /// Like [`Adapter::request_device`], decoding the descriptor from a host value.
    /// An absent descriptor requests the defaults.
    pub async fn request_device_from_host(&self, descriptor: &HostValue) -> Result<Device, Error> {
        let descriptor = DeviceDescriptor::from_host(descriptor)?;
        Device::new(self, &descriptor)
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        self.0.native.driver()
    }

    pub(crate) fn config(&self) -> &BridgeConfig {
        self.0.entry_point.config()
    }
}

impl PartialEq for Adapter {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl HostClass for Adapter {
    const CLASS_NAME: &'static str = "GPUAdapter";
}
