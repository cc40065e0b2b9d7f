// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Buffer mapping: completion slots, waits, and the views handed to callers.

A map request moves through three steps:

1. The buffer registers a [`MapSlot`] callback with the driver.
2. Something ticks the device until the driver fires the callback, which
   stores the outcome in the slot and wakes any blocked waiter.
3. The buffer wraps the mapped region in a [`MappedView`] and records it in
   its [`MappedViewRegistry`].

Unmapping or destroying the buffer detaches every registered view before the
driver reclaims the region, so a view never observes memory it no longer owns.
*/

use crate::config::BridgeConfig;
use crate::error::Error;
use crate::imp::{MapAsyncStatus, MapCallback, MapMode, NativeMapping};
use crate::sys::sync::lock;
use crate::sys::time::Instant;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

/// What a completed map request produced.
pub(crate) type MapOutcome = Result<NativeMapping, MapAsyncStatus>;

enum SlotState {
    Waiting,
    Ready(MapOutcome),
    Taken,
}

/// Shared landing place for one map request's completion.
pub(crate) struct MapSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Debug for MapSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match *lock(&self.state) {
            SlotState::Waiting => "waiting",
            SlotState::Ready(_) => "ready",
            SlotState::Taken => "taken",
        };
        f.debug_struct("MapSlot").field("state", &state).finish()
    }
}

impl MapSlot {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MapSlot {
            state: Mutex::new(SlotState::Waiting),
            ready: Condvar::new(),
        })
    }

    /// The native completion callback that fills this slot.
    pub(crate) fn callback(self: &Arc<Self>) -> MapCallback {
        let slot = self.clone();
        Box::new(move |outcome| {
            let mut state = lock(&slot.state);
            match *state {
                SlotState::Waiting => *state = SlotState::Ready(outcome),
                _ => {
                    logwise::error_sync!("map callback fired more than once for the same request");
                    return;
                }
            }
            drop(state);
            slot.ready.notify_all();
        })
    }

    fn take_locked(state: &mut SlotState) -> Option<MapOutcome> {
        match std::mem::replace(state, SlotState::Taken) {
            SlotState::Ready(outcome) => Some(outcome),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Removes the outcome if the callback has fired.
    pub(crate) fn try_take(&self) -> Option<MapOutcome> {
        Self::take_locked(&mut lock(&self.state))
    }

    /// Ticks the device until the callback fires or the timeout passes.
    ///
    /// Between ticks the caller sleeps on the slot's condvar, so a callback
    /// fired from another thread wakes it immediately.
    pub(crate) fn wait_blocking(&self, tick: impl Fn(), config: &BridgeConfig) -> Result<MapOutcome, Error> {
        let deadline = Deadline::after(config);
        let interval = logwise::perfwarn_begin!("MapSlot::wait_blocking");
        loop {
            tick();
            let mut state = lock(&self.state);
            if let Some(outcome) = Self::take_locked(&mut state) {
                drop(interval);
                return Ok(outcome);
            }
            let Some(remaining) = deadline.remaining() else {
                drop(interval);
                return Err(deadline.timed_out());
            };
            let wait = config.poll_interval.min(remaining);
            let (mut state, _) = self
                .ready
                .wait_timeout(state, wait)
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(outcome) = Self::take_locked(&mut state) {
                drop(interval);
                return Ok(outcome);
            }
        }
    }

    /// Async form of [`MapSlot::wait_blocking`]: sleeps between ticks instead of blocking.
    pub(crate) async fn wait_async(&self, tick: impl Fn(), config: &BridgeConfig) -> Result<MapOutcome, Error> {
        let deadline = Deadline::after(config);
        loop {
            tick();
            if let Some(outcome) = self.try_take() {
                return Ok(outcome);
            }
            let Some(remaining) = deadline.remaining() else {
                return Err(deadline.timed_out());
            };
            portable_async_sleep::async_sleep(config.poll_interval.min(remaining)).await;
        }
    }
}

/// When a map wait gives up. A timeout too large to represent never expires.
struct Deadline {
    at: Option<Instant>,
    timeout: Duration,
}

impl Deadline {
    fn after(config: &BridgeConfig) -> Self {
        Deadline {
            at: Instant::now().checked_add(config.map_timeout),
            timeout: config.map_timeout,
        }
    }

    /// Time left before the deadline, or `None` once it has passed.
    fn remaining(&self) -> Option<Duration> {
        match self.at {
            None => Some(Duration::MAX),
            Some(at) => {
                let now = Instant::now();
                (now < at).then(|| at - now)
            }
        }
    }

    fn timed_out(&self) -> Error {
        logwise::warn_sync!(
            "map request still pending after {timeout}",
            timeout = logwise::privacy::LogIt(&self.timeout)
        );
        Error::MapTimeout(self.timeout)
    }
}

struct ViewShared {
    mode: MapMode,
    len: usize,
    region: Mutex<Option<NativeMapping>>,
}

/// A window onto a mapped buffer's memory.
///
/// Views are cheap to clone; every clone shares the same region and is
/// detached at the same moment. Accessors run their closure under the view's
/// lock, so the closure must not unmap or destroy the buffer.
#[derive(Clone)]
pub struct MappedView {
    shared: Arc<ViewShared>,
}

impl Debug for MappedView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedView")
            .field("mode", &self.shared.mode)
            .field("len", &self.shared.len)
            .field("detached", &self.is_detached())
            .finish()
    }
}

impl MappedView {
    pub(crate) fn new(mode: MapMode, mapping: NativeMapping) -> Self {
        MappedView {
            shared: Arc::new(ViewShared {
                mode,
                len: mapping.len(),
                region: Mutex::new(Some(mapping)),
            }),
        }
    }

    /// Length in bytes. Unchanged by detaching.
    pub fn len(&self) -> usize {
        self.shared.len
    }

    pub fn is_empty(&self) -> bool {
        self.shared.len == 0
    }

    pub fn mode(&self) -> MapMode {
        self.shared.mode
    }

    pub fn is_detached(&self) -> bool {
        lock(&self.shared.region).is_none()
    }

    /// Runs `f` over the mapped bytes.
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, Error> {
        let region = lock(&self.shared.region);
        let mapping = region.as_ref().ok_or(Error::Detached)?;
        //SAFETY: the region is attached, so the driver still holds it mapped
        Ok(f(unsafe { mapping.as_slice() }))
    }

    /// Runs `f` over the mapped bytes, mutably. Only write mappings allow this.
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, Error> {
        if self.shared.mode != MapMode::Write {
            return Err(Error::ReadOnlyView);
        }
        let mut region = lock(&self.shared.region);
        let mapping = region.as_mut().ok_or(Error::Detached)?;
        //SAFETY: as in `read`; the lock gives us the only access
        Ok(f(unsafe { mapping.as_mut_slice() }))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        self.read(|bytes| bytes.to_vec())
    }

    /// Copies `data` into the view at `offset`.
    pub fn copy_from_slice(&self, offset: usize, data: &[u8]) -> Result<(), Error> {
        let len = self.shared.len;
        let end = offset
            .checked_add(data.len())
            .filter(|end| *end <= len)
            .ok_or(Error::OutOfBounds {
                offset,
                end: offset.saturating_add(data.len()),
                len,
            })?;
        self.write(|bytes| bytes[offset..end].copy_from_slice(data))
    }

    /// Severs the view from its region. Returns whether it was attached.
    pub(crate) fn detach(&self) -> bool {
        lock(&self.shared.region).take().is_some()
    }
}

/// The views one buffer has handed out since it was last unmapped.
#[derive(Debug, Default)]
pub(crate) struct MappedViewRegistry {
    views: Vec<MappedView>,
}

impl MappedViewRegistry {
    pub(crate) fn register(&mut self, view: MappedView) {
        self.views.push(view);
    }

    /// Detaches every view and empties the registry. Returns how many were attached.
    pub(crate) fn detach_all(&mut self) -> usize {
        self.views.drain(..).filter(|view| view.detach()).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.views.len()
    }

    pub(crate) fn views(&self) -> &[MappedView] {
        &self.views
    }
}
