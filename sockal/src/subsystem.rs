//! One-time setup of the operating system networking stack.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::sys;

static GLOBAL: NetworkingSubsystem = NetworkingSubsystem::new();

/// Process-wide readiness of the networking stack.
///
/// Winsock must be started before the first socket call and cleaned up afterwards; POSIX needs
/// neither. Every socket operation that issues a syscall goes through
/// [`NetworkingSubsystem::global`] first.
///
/// Initialization is attempted lazily and retried on the next call while it keeps failing.
#[derive(Debug)]
pub struct NetworkingSubsystem {
    initialized: AtomicBool,
    lock: Mutex<()>,
    startup: fn() -> io::Result<()>,
    cleanup: fn(),
}

impl NetworkingSubsystem {
    /// Creates an uninitialized subsystem for the current platform.
    pub const fn new() -> Self {
        Self::with_hooks(sys::startup, sys::cleanup)
    }

    pub(crate) const fn with_hooks(startup: fn() -> io::Result<()>, cleanup: fn()) -> Self {
        Self {
            initialized: AtomicBool::new(false),
            lock: Mutex::new(()),
            startup,
            cleanup,
        }
    }

    /// Returns the process-wide instance used by all sockets.
    ///
    /// It is never torn down explicitly; the operating system reclaims it at process exit.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Starts the networking stack unless that already happened.
    ///
    /// Concurrent first calls start it exactly once. A failed start leaves the subsystem
    /// uninitialized, so the next call tries again.
    pub fn initialize_if_not_already(&self) -> io::Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        match (self.startup)() {
            Ok(()) => {
                self.initialized.store(true, Ordering::Release);
                tracing::debug!("networking subsystem initialized");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(native_error = error.raw_os_error(), %error, "networking startup failed");
                Err(error)
            }
        }
    }

    /// Returns `true` once the networking stack has been started successfully.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Tears the networking stack down if it was started.
    ///
    /// Sockets that are still open afterwards are unusable on platforms that need setup. A later
    /// [`initialize_if_not_already`](Self::initialize_if_not_already) starts it again.
    pub fn terminate(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.initialized.swap(false, Ordering::AcqRel) {
            (self.cleanup)();
            tracing::debug!("networking subsystem terminated");
        }
    }
}

impl Default for NetworkingSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NetworkingSubsystem {
    fn drop(&mut self) {
        if *self.initialized.get_mut() {
            (self.cleanup)();
        }
    }
}

/// Builds a subsystem whose first startup fails with native code `$code` and whose later ones
/// succeed.
#[cfg(test)]
macro_rules! subsystem_failing_once {
    ($code:literal) => {{
        static ATTEMPTS: ::std::sync::atomic::AtomicUsize = ::std::sync::atomic::AtomicUsize::new(0);

        fn startup() -> ::std::io::Result<()> {
            if ATTEMPTS.fetch_add(1, ::std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(::std::io::Error::from_raw_os_error($code))
            } else {
                Ok(())
            }
        }

        $crate::subsystem::NetworkingSubsystem::with_hooks(startup, || {})
    }};
}

#[cfg(test)]
pub(crate) use subsystem_failing_once;
