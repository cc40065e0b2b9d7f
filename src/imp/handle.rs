// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Opaque native handles.
//!
//! Handles are plain ids minted by a driver. They carry no ownership; the
//! wrapper that received one from a `create_*` call is responsible for
//! releasing it.

use std::num::NonZeroU64;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU64);

        impl $name {
            pub fn from_raw(raw: NonZeroU64) -> Self {
                $name(raw)
            }

            pub fn raw(self) -> NonZeroU64 {
                self.0
            }

            pub(crate) fn id(self) -> u64 {
                self.0.get()
            }
        }
    };
}

native_handle!(
    /// A physical adapter picked by the driver.
    AdapterHandle
);
native_handle!(
    /// A logical device created from an adapter.
    DeviceHandle
);
native_handle!(BufferHandle);
native_handle!(TextureHandle);
native_handle!(SwapChainHandle);
native_handle!(
    /// A ray-tracing acceleration container (bottom- or top-level).
    AccelerationContainerHandle
);
