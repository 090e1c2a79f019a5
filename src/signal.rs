//! Cooperative shutdown on SIGINT / SIGTERM.
//!
//! The first signal trips a latch and puts the previous dispositions back, so
//! a second signal gets the default behaviour (usually killing the process).
//! The training loop polls the latch once per iteration and stops after
//! saving a checkpoint.
//!
//! The latch is a process static because the handler cannot carry state.
//! Nothing else reads it: [`GracefulKiller`] is its only handle, and the loop
//! only ever sees it as an injected `&dyn StopSignal`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use nix::libc;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};

/// Something the training loop can ask whether it should stop.
pub trait StopSignal {
    fn poll(&self) -> bool;
}

impl StopSignal for AtomicBool {
    fn poll(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Two-state latch: armed until the first trip, stopping afterwards.
#[derive(Debug)]
pub struct SignalLatch {
    stopping: AtomicBool,
}

impl SignalLatch {
    pub const fn new() -> Self {
        Self {
            stopping: AtomicBool::new(false),
        }
    }

    /// Move to the stopping state. Returns `true` only for the first trip.
    pub fn trip(&self) -> bool {
        !self.stopping.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}

impl Default for SignalLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal for SignalLatch {
    fn poll(&self) -> bool {
        self.is_stopping()
    }
}

const SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

static LATCH: SignalLatch = SignalLatch::new();
static PREVIOUS: OnceLock<[SigAction; 2]> = OnceLock::new();

/// Put back the dispositions found at install time.
fn restore_previous() {
    if let Some(previous) = PREVIOUS.get() {
        for (signal, action) in SIGNALS.iter().zip(previous) {
            // SAFETY: reinstalls a disposition the process had before.
            let _ = unsafe { sigaction(*signal, action) };
        }
    }
}

extern "C" fn exit_gracefully(_: libc::c_int) {
    // Only atomics and sigaction, both async-signal-safe.
    if LATCH.trip() {
        restore_previous();
    }
}

/// Handle to the process-wide SIGINT / SIGTERM latch.
#[derive(Debug)]
pub struct GracefulKiller {
    _installed: (),
}

impl GracefulKiller {
    /// Install the handlers. Only one killer may exist per process.
    pub fn install() -> Result<Self> {
        if PREVIOUS.get().is_some() {
            return Err(Error::Signal(nix::Error::EBUSY));
        }
        let action = SigAction::new(
            SigHandler::Handler(exit_gracefully),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: the handler only touches atomics and calls sigaction.
        let previous = unsafe { [sigaction(SIGNALS[0], &action)?, sigaction(SIGNALS[1], &action)?] };
        if PREVIOUS.set(previous).is_err() {
            return Err(Error::Signal(nix::Error::EBUSY));
        }
        // A signal that arrived before the previous dispositions were stored
        // could not restore them.
        if LATCH.is_stopping() {
            restore_previous();
        }
        Ok(Self { _installed: () })
    }

    /// Whether a termination signal has been received.
    pub fn kill_now(&self) -> bool {
        LATCH.is_stopping()
    }
}

impl StopSignal for GracefulKiller {
    fn poll(&self) -> bool {
        self.kill_now()
    }
}
