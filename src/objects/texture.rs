// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::descriptors::{Extent3d, TextureDescriptor, TextureFormat, TextureUsage};
use crate::error::Error;
use crate::host::{HostClass, HostValue, expect_object};
use crate::imp::{Driver, TextureHandle};
use crate::objects::{Device, SwapChain};
use crate::ownership::Owned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
enum Parent {
    Device(Device),
    /// A frame acquired from a swap chain.
    SwapChain(SwapChain),
}

#[derive(Debug)]
struct TextureInner {
    native: Owned<TextureHandle>,
    parent: Parent,
    descriptor: TextureDescriptor,
    destroyed: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct Texture(Arc<TextureInner>);

impl Texture {
    pub(crate) fn new(device: &Device, descriptor: &TextureDescriptor) -> Result<Self, Error> {
        let driver = device.driver().clone();
        let handle = driver.create_texture(device.native_handle(), descriptor)?;
        Ok(Texture(Arc::new(TextureInner {
            native: Owned::new(handle, driver),
            parent: Parent::Device(device.clone()),
            descriptor: descriptor.clone(),
            destroyed: AtomicBool::new(false),
        })))
    }

    pub(crate) fn frame(swap_chain: &SwapChain, native: Owned<TextureHandle>, descriptor: TextureDescriptor) -> Self {
        Texture(Arc::new(TextureInner {
            native,
            parent: Parent::SwapChain(swap_chain.clone()),
            descriptor,
            destroyed: AtomicBool::new(false),
        }))
    }

    /// Creates a texture from host arguments; `device` is checked first.
    pub fn from_host(device: &HostValue, descriptor: &HostValue) -> Result<Self, Error> {
        let device = expect_object::<Device>(device, "GPUTexture: argument 0")?;
        device.create_texture_from_host(descriptor)
    }

    pub fn device(&self) -> &Device {
        match &self.0.parent {
            Parent::Device(device) => device,
            Parent::SwapChain(swap_chain) => swap_chain.device(),
        }
    }

    /// The swap chain this texture is a frame of, if any.
    pub fn swap_chain(&self) -> Option<&SwapChain> {
        match &self.0.parent {
            Parent::Device(_) => None,
            Parent::SwapChain(swap_chain) => Some(swap_chain),
        }
    }

    pub fn size(&self) -> Extent3d {
        self.0.descriptor.size
    }

    pub fn format(&self) -> TextureFormat {
        self.0.descriptor.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.0.descriptor.usage
    }

    pub fn native_handle(&self) -> TextureHandle {
        self.0.native.handle()
    }

    /// What the driver reports about this texture.
    pub fn descriptor(&self) -> Option<TextureDescriptor> {
        self.driver().describe_texture(self.native_handle())
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.load(Ordering::Acquire)
    }

    /// Frees the texture's storage. Later calls do nothing.
    pub fn destroy(&self) {
        if !self.0.destroyed.swap(true, Ordering::AcqRel) {
            self.driver().texture_destroy(self.native_handle());
        }
    }

    fn driver(&self) -> &Arc<dyn Driver> {
        self.0.native.driver()
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl HostClass for Texture {
    const CLASS_NAME: &'static str = "GPUTexture";
}
