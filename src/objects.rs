// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Host-visible wrapper objects.

Every wrapper is a cheap, clonable handle over a shared inner value. The inner
value owns one native handle and keeps its parent alive:

```text
AccelerationContainer ──► Buffer / AccelerationContainer (dependents)
        │
SwapChain ──► CanvasContext
   │
Texture ─┬─► Device ──► Adapter ──► EntryPoint (driver)
Buffer ──┘     ▲
Queue ─────────┘
```

The native handle is released when the last clone drops, before any parent
reference goes away.
*/

mod acceleration;
mod adapter;
mod buffer;
mod canvas;
mod device;
mod queue;
mod texture;

pub use acceleration::{
    AccelerationContainer, AccelerationContainerDescriptor, GeometryDescriptor, IndexData,
    InstanceDescriptor,
};
pub use adapter::Adapter;
pub use buffer::{Buffer, MapState};
pub use canvas::{CanvasContext, SurfaceTarget, SwapChain, SwapChainDescriptor, WindowHandles};
pub use device::Device;
pub use queue::Queue;
pub use texture::Texture;
