// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::host::HostClass;
use crate::objects::{Buffer, Device};
use std::future::Future;

/// The device's submission queue.
#[derive(Debug, Clone)]
pub struct Queue {
    device: Device,
}

impl Queue {
    pub(crate) fn new(device: Device) -> Self {
        Queue { device }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Uploads `data` into `buffer` at `offset`.
    ///
    /// Invalid writes (mapped buffer, missing `COPY_DST`, out of range) are
    /// reported to the device's error subscriber.
    pub fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) {
        buffer.set_sub_data(offset, data);
    }

    /// Resolves once all work submitted so far has completed.
    ///
    /// The driver reports completion on a later [`Device::tick`]; nothing
    /// resolves the future unless the device is ticked.
    pub fn on_submitted_work_done(&self) -> impl Future<Output = ()> + Send + 'static {
        let (s, r) = r#continue::continuation();
        self.device.driver().queue_on_submitted_work_done(
            self.device.native_handle(),
            Box::new(move || {
                s.send(());
            }),
        );
        r
    }
}

impl HostClass for Queue {
    const CLASS_NAME: &'static str = "GPUQueue";
}
