// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Release-once ownership of native handles.
//!
//! Every wrapper stores its handle in an [`Owned`] as the *first* field of its
//! shared inner struct, ahead of the `Arc`s to its parents. Rust drops fields
//! in declaration order, so the handle is returned to the driver before the
//! parent could be released.

use crate::imp::{
    AccelerationContainerHandle, AdapterHandle, BufferHandle, DeviceHandle, Driver,
    SwapChainHandle, TextureHandle,
};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A native handle kind with a matching driver release call.
pub(crate) trait Release: Copy + Debug + Send + Sync + 'static {
    const KIND: &'static str;
    fn raw_id(self) -> u64;
    fn release(self, driver: &dyn Driver);
}

macro_rules! release_via {
    ($handle:ty, $kind:literal, $method:ident) => {
        impl Release for $handle {
            const KIND: &'static str = $kind;
            fn raw_id(self) -> u64 {
                self.id()
            }
            fn release(self, driver: &dyn Driver) {
                driver.$method(self)
            }
        }
    };
}

release_via!(AdapterHandle, "adapter", release_adapter);
release_via!(DeviceHandle, "device", release_device);
release_via!(BufferHandle, "buffer", release_buffer);
release_via!(TextureHandle, "texture", release_texture);
release_via!(SwapChainHandle, "swap chain", release_swap_chain);
release_via!(
    AccelerationContainerHandle,
    "acceleration container",
    release_acceleration_container
);

/// A native handle that is released exactly once, when this value drops.
pub(crate) struct Owned<H: Release> {
    handle: H,
    driver: Arc<dyn Driver>,
}

impl<H: Release> Owned<H> {
    pub(crate) fn new(handle: H, driver: Arc<dyn Driver>) -> Self {
        logwise::trace_sync!(
            "acquired {kind} {id}",
            kind = H::KIND.to_string(),
            id = handle.raw_id()
        );
        Owned { handle, driver }
    }

    pub(crate) fn handle(&self) -> H {
        self.handle
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl<H: Release> Debug for Owned<H> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owned")
            .field("handle", &self.handle)
            .field("backend", &self.driver.backend_name())
            .finish()
    }
}

impl<H: Release> Drop for Owned<H> {
    fn drop(&mut self) {
        logwise::trace_sync!(
            "releasing {kind} {id}",
            kind = H::KIND.to_string(),
            id = self.handle.raw_id()
        );
        self.handle.release(self.driver.as_ref());
    }
}
