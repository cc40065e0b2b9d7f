// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Platform-independent entrypoint.
//!
//! An [`EntryPoint`] binds one native driver and the [`BridgeConfig`] every
//! object created through it follows.

use crate::config::BridgeConfig;
use crate::descriptors::{AdapterOptions, HostDescriptor};
use crate::error::Error;
use crate::host::HostValue;
use crate::imp::{self, Driver, driver_for};
use crate::objects::Adapter;
use std::fmt::Formatter;
use std::sync::Arc;

#[derive(Debug)]
struct EntryPointInner {
    driver: Arc<dyn Driver>,
    config: BridgeConfig,
}

/// The root of the object graph. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EntryPoint(Arc<EntryPointInner>);

///platform-independent error type
#[derive(Debug)]
pub struct EntryPointError(imp::Error);
impl std::fmt::Display for EntryPointError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
impl std::error::Error for EntryPointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<EntryPointError> for Error {
    fn from(e: EntryPointError) -> Self {
        Error::Driver(e.0)
    }
}

impl EntryPoint {
    /// Binds the driver named by the environment (see [`BridgeConfig::from_env_or_default`]).
    pub async fn new() -> Result<Self, EntryPointError> {
        Self::with_config(BridgeConfig::from_env_or_default()).await
    }

    pub async fn with_config(config: BridgeConfig) -> Result<Self, EntryPointError> {
        let driver = driver_for(config.backend).map_err(EntryPointError)?;
        logwise::info_sync!(
            "entry point bound to the {backend} backend",
            backend = driver.backend_name().to_string()
        );
        Ok(Self::with_driver(driver, config))
    }

    /// An entry point on a fresh [`SoftDriver`](crate::SoftDriver) with the default config.
    pub fn software() -> Self {
        Self::with_driver(Arc::new(imp::soft::SoftDriver::new()), BridgeConfig::default())
    }

    /// Binds an existing driver. Tests use this to keep a handle on the driver.
    pub fn with_driver(driver: Arc<dyn Driver>, config: BridgeConfig) -> Self {
        EntryPoint(Arc::new(EntryPointInner { driver, config }))
    }

    pub async fn request_adapter(&self, options: &AdapterOptions) -> Result<Adapter, Error> {
        let handle = self.0.driver.request_adapter(options)?;
        Adapter::new(self, handle)
    }

    /// Requests an adapter from a host options object (`undefined` and `null` mean defaults).
    pub async fn request_adapter_from_host(&self, options: &HostValue) -> Result<Adapter, Error> {
        let options = AdapterOptions::from_host(options)?;
        self.request_adapter(&options).await
    }

    pub fn backend_name(&self) -> &'static str {
        self.0.driver.backend_name()
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.0.driver
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.0.config
    }
}

impl PartialEq for EntryPoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    #[test_executors::async_test]
    async fn software_backend_from_config() {
        let config = BridgeConfig {
            backend: BackendKind::Software,
            ..BridgeConfig::default()
        };
        let entry_point = EntryPoint::with_config(config).await.expect("soft backend");
        assert_eq!(entry_point.backend_name(), "soft");
        let adapter = entry_point
            .request_adapter(&AdapterOptions::default())
            .await
            .expect("adapter");
        assert_eq!(adapter.entry_point(), &entry_point);
    }

    #[cfg(not(feature = "backend_wgpu"))]
    #[test_executors::async_test]
    async fn missing_backend_is_an_entry_point_error() {
        let config = BridgeConfig {
            backend: BackendKind::Wgpu,
            ..BridgeConfig::default()
        };
        let err = EntryPoint::with_config(config).await.expect_err("no wgpu");
        assert!(err.to_string().contains("wgpu"));
        assert!(matches!(
            Error::from(err),
            Error::Driver(imp::Error::BackendUnavailable("wgpu"))
        ));
    }
}
