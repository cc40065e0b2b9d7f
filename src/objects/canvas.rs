// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Canvas contexts and the swap chains configured on them.

use crate::descriptors::{Extent3d, TextureDescriptor, TextureFormat, TextureUsage};
use crate::error::Error;
use crate::host::{HostClass, HostValue, ObjectReader, expect_object};
use crate::imp::{Driver, NativeSwapChainDescriptor, SwapChainHandle};
use crate::objects::{Device, Texture};
use crate::ownership::Owned;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

/// Raw handles of a native window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowHandles {
    window: RawWindowHandle,
    display: RawDisplayHandle,
}

//raw handles are plain ids/pointers; only drivers dereference them, under the
//contract of `WindowHandles::from_window`
unsafe impl Send for WindowHandles {}
unsafe impl Sync for WindowHandles {}

impl WindowHandles {
    /// Captures the raw handles of `window`.
    ///
    /// # Safety
    /// The window must outlive every swap chain configured on a canvas built
    /// from these handles.
    pub unsafe fn from_window(window: &(impl HasWindowHandle + HasDisplayHandle)) -> Result<Self, Error> {
        Ok(WindowHandles {
            window: window.window_handle()?.as_raw(),
            display: window.display_handle()?.as_raw(),
        })
    }

    pub fn window(&self) -> RawWindowHandle {
        self.window
    }

    pub fn display(&self) -> RawDisplayHandle {
        self.display
    }
}

/// What a canvas presents to.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceTarget {
    /// An offscreen surface of the given size.
    Headless { width: u32, height: u32 },
    Window {
        handles: WindowHandles,
        width: u32,
        height: u32,
    },
}

impl SurfaceTarget {
    pub fn size(&self) -> Extent3d {
        match self {
            SurfaceTarget::Headless { width, height }
            | SurfaceTarget::Window { width, height, .. } => Extent3d::new(*width, *height),
        }
    }
}

#[derive(Debug)]
struct CanvasInner {
    target: SurfaceTarget,
}

/// The presentation side of a canvas.
#[derive(Debug, Clone)]
pub struct CanvasContext(Arc<CanvasInner>);

impl CanvasContext {
    pub fn new(target: SurfaceTarget) -> Self {
        CanvasContext(Arc::new(CanvasInner { target }))
    }

    pub fn target(&self) -> &SurfaceTarget {
        &self.0.target
    }

    pub fn configure_swap_chain(&self, descriptor: &SwapChainDescriptor) -> Result<SwapChain, Error> {
        SwapChain::new(self, descriptor)
    }

    pub fn configure_swap_chain_from_host(&self, descriptor: &HostValue) -> Result<SwapChain, Error> {
        let descriptor = SwapChainDescriptor::from_host(descriptor)?;
        self.configure_swap_chain(&descriptor)
    }

    /// The format `device` prefers for swap chains on this canvas.
    pub async fn preferred_swap_chain_format(&self, device: &Device) -> Result<TextureFormat, Error> {
        Ok(device
            .driver()
            .preferred_swap_chain_format(device.native_handle())?)
    }
}

impl HostClass for CanvasContext {
    const CLASS_NAME: &'static str = "GPUCanvasContext";
}

#[derive(Debug, Clone)]
pub struct SwapChainDescriptor {
    pub device: Device,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl SwapChainDescriptor {
    const NAME: &'static str = "GPUSwapChainDescriptor";

    pub fn new(device: &Device, format: TextureFormat) -> Self {
        SwapChainDescriptor {
            device: device.clone(),
            format,
            usage: TextureUsage::OUTPUT_ATTACHMENT,
        }
    }

    /// Decodes `{ device, format, usage? }`. The device is checked first.
    pub fn from_host(value: &HostValue) -> Result<Self, Error> {
        let reader = ObjectReader::new(value, Self::NAME, &["device", "format", "usage"])?;
        let device = reader.object::<Device>("device")?;
        let format = reader.data("format")?;
        let usage = reader
            .optional_data("usage")?
            .unwrap_or(TextureUsage::OUTPUT_ATTACHMENT);
        Ok(SwapChainDescriptor {
            device,
            format,
            usage,
        })
    }
}

#[derive(Debug)]
struct SwapChainInner {
    native: Owned<SwapChainHandle>,
    device: Device,
    canvas: CanvasContext,
    format: TextureFormat,
    usage: TextureUsage,
}

/// A sequence of presentable frames on a canvas.
#[derive(Debug, Clone)]
pub struct SwapChain(Arc<SwapChainInner>);

impl SwapChain {
    fn new(canvas: &CanvasContext, descriptor: &SwapChainDescriptor) -> Result<Self, Error> {
        let device = &descriptor.device;
        let driver = device.driver().clone();
        let handle = driver.create_swap_chain(
            device.native_handle(),
            canvas.target(),
            &NativeSwapChainDescriptor {
                format: descriptor.format,
                usage: descriptor.usage,
            },
        )?;
        logwise::info_sync!(
            "configured swap chain {format}",
            format = descriptor.format.as_str().to_string()
        );
        Ok(SwapChain(Arc::new(SwapChainInner {
            native: Owned::new(handle, driver),
            device: device.clone(),
            canvas: canvas.clone(),
            format: descriptor.format,
            usage: descriptor.usage,
        })))
    }

    /// Configures a swap chain from host arguments; `canvas` is checked first.
    pub fn from_host(canvas: &HostValue, descriptor: &HostValue) -> Result<Self, Error> {
        let canvas = expect_object::<CanvasContext>(canvas, "GPUSwapChain: argument 0")?;
        canvas.configure_swap_chain_from_host(descriptor)
    }

    pub fn device(&self) -> &Device {
        &self.0.device
    }

    pub fn canvas(&self) -> &CanvasContext {
        &self.0.canvas
    }

    pub fn format(&self) -> TextureFormat {
        self.0.format
    }

    pub fn usage(&self) -> TextureUsage {
        self.0.usage
    }

    pub fn native_handle(&self) -> SwapChainHandle {
        self.0.native.handle()
    }

    /// Acquires the texture for the current frame.
    pub fn get_current_texture(&self) -> Result<Texture, Error> {
        let driver = self.driver().clone();
        let handle = driver.swap_chain_current_texture(self.0.native.handle())?;
        let descriptor = TextureDescriptor::new(self.0.canvas.target().size(), self.0.format, self.0.usage);
        Ok(Texture::frame(self, Owned::new(handle, driver), descriptor))
    }

    /// Presents the current frame.
    pub fn present(&self) {
        self.driver().swap_chain_present(self.0.native.handle());
    }

    fn driver(&self) -> &Arc<dyn Driver> {
        self.0.native.driver()
    }
}

impl HostClass for SwapChain {
    const CLASS_NAME: &'static str = "GPUSwapChain";
}
