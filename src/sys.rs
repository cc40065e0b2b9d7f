// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0

//! System abstractions for cross-platform compatibility.
//!
//! Map waits measure deadlines with these types, so they must work on
//! both native and WASM targets.

pub mod time {
    //! On native platforms, this re-exports `std::time` types.
    //! On WASM platforms, this re-exports `web_time` types for compatibility.

    #[cfg(not(target_arch = "wasm32"))]
    pub use std::time::Instant;

    #[cfg(target_arch = "wasm32")]
    pub use web_time::Instant;
}

pub mod sync {
    //! Lock helpers.
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Locks `mutex`, recovering the guard if a previous holder panicked.
    ///
    /// Every structure guarded this way is left consistent between statements,
    /// so a poisoned lock carries no torn state.
    pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
