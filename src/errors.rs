// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Delivery of uncaptured native errors to a single subscriber.
//!
//! Each device owns one [`ErrorSink`]. The sink holds at most one callback;
//! subscribing replaces the previous callback, which is never invoked again.
//! The native driver reports into the sink from whatever context it is
//! pumped in (usually a device tick), and the sink calls the subscriber
//! without holding its own lock, so the subscriber may re-subscribe or call
//! back into the device.

use crate::sys::sync::lock;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// The kind of error the native driver reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    OutOfMemory,
    Unknown,
    DeviceLost,
}

impl ErrorCategory {
    /// The tag passed to subscribers.
    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::Validation => "Validation",
            ErrorCategory::OutOfMemory => "Out of memory",
            ErrorCategory::Unknown => "Unknown",
            ErrorCategory::DeviceLost => "Device lost",
        }
    }

    /// Formats a native message the way subscribers receive it.
    pub fn format_message(self, native_message: &str) -> String {
        format!("{} Error: {}", self.label(), native_message)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A subscriber: receives the category and the formatted message.
pub type ErrorCallback = dyn Fn(ErrorCategory, &str) + Send + Sync;

struct Subscriber {
    id: u64,
    callback: Arc<ErrorCallback>,
}

pub(crate) struct ErrorSink {
    current: Mutex<Option<Subscriber>>,
    next_id: AtomicU64,
}

impl Debug for ErrorSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let id = lock(&self.current).as_ref().map(|s| s.id);
        f.debug_struct("ErrorSink").field("subscriber", &id).finish()
    }
}

impl ErrorSink {
    pub(crate) fn new() -> Self {
        ErrorSink {
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(self: &Arc<Self>, callback: Arc<ErrorCallback>) -> ErrorSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = lock(&self.current).replace(Subscriber { id, callback });
        if let Some(previous) = previous {
            logwise::trace_sync!(
                "error subscriber {old} replaced by {new}",
                old = previous.id,
                new = id
            );
        }
        ErrorSubscription {
            id,
            sink: Arc::downgrade(self),
        }
    }

    pub(crate) fn clear(&self) {
        lock(&self.current).take();
    }

    fn clear_if(&self, id: u64) -> bool {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|s| s.id == id) {
            *current = None;
            true
        } else {
            false
        }
    }

    fn is_current(&self, id: u64) -> bool {
        lock(&self.current).as_ref().is_some_and(|s| s.id == id)
    }

    /// Routes one native error to the subscriber. Returns whether anyone received it.
    pub(crate) fn deliver(&self, category: ErrorCategory, native_message: &str) -> bool {
        let callback = lock(&self.current).as_ref().map(|s| s.callback.clone());
        let message = category.format_message(native_message);
        match callback {
            Some(callback) => {
                callback(category, &message);
                true
            }
            None => {
                logwise::warn_sync!(
                    "uncaptured GPU error with no subscriber: {message}",
                    message = message
                );
                false
            }
        }
    }
}

/// Handle for an error callback registered with
/// [`Device::on_uncaptured_error`](crate::objects::Device::on_uncaptured_error).
///
/// Dropping the handle leaves the callback installed.
#[derive(Debug)]
pub struct ErrorSubscription {
    id: u64,
    sink: Weak<ErrorSink>,
}

impl ErrorSubscription {
    /// Whether this callback is still the one receiving errors.
    pub fn is_active(&self) -> bool {
        self.sink.upgrade().is_some_and(|sink| sink.is_current(self.id))
    }

    /// Removes this callback if it has not been replaced already.
    ///
    /// Returns `true` if the callback was removed by this call.
    pub fn unsubscribe(self) -> bool {
        self.sink
            .upgrade()
            .is_some_and(|sink| sink.clear_if(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (Arc<AtomicUsize>, Arc<ErrorCallback>) {
        let count = Arc::new(AtomicUsize::new(0));
        let move_count = count.clone();
        let callback: Arc<ErrorCallback> = Arc::new(move |_: ErrorCategory, _: &str| {
            move_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, callback)
    }

    #[test]
    fn messages_carry_the_category_label() {
        assert_eq!(
            ErrorCategory::OutOfMemory.format_message("heap exhausted"),
            "Out of memory Error: heap exhausted"
        );
        assert_eq!(ErrorCategory::DeviceLost.label(), "Device lost");
    }

    #[test]
    fn replaced_subscriber_goes_quiet() {
        let sink = Arc::new(ErrorSink::new());
        let (first_count, first) = counting();
        let (second_count, second) = counting();
        let first_subscription = sink.subscribe(first);
        assert!(sink.deliver(ErrorCategory::Validation, "a"));
        let second_subscription = sink.subscribe(second);
        assert!(!first_subscription.is_active());
        assert!(second_subscription.is_active());
        sink.deliver(ErrorCategory::Validation, "b");
        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
        // a stale handle cannot remove its replacement
        assert!(!first_subscription.unsubscribe());
        assert!(second_subscription.is_active());
        assert!(second_subscription.unsubscribe());
        assert!(!sink.deliver(ErrorCategory::Unknown, "c"));
    }

    #[test]
    fn subscriber_may_resubscribe_while_called() {
        let sink = Arc::new(ErrorSink::new());
        let move_sink = sink.clone();
        let (count, replacement) = counting();
        let _subscription = sink.subscribe(Arc::new(move |_: ErrorCategory, _: &str| {
            move_sink.subscribe(replacement.clone());
        }));
        sink.deliver(ErrorCategory::Validation, "first");
        sink.deliver(ErrorCategory::Validation, "second");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
