//! Interrupt handling.
//!
//! The handler only records which signal arrived. Descent, the interactive
//! runner and child waits poll the record at safe points and hand control to
//! the unwind engine on the main flow.

use std::sync::atomic::{AtomicI32, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::{Error, Result};

/// Signals treated as a request to stop and clean up.
pub const HANDLED: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

static PENDING: AtomicI32 = AtomicI32::new(0);

extern "C" fn record(signo: libc::c_int) {
    PENDING.store(signo, Ordering::SeqCst);
}

/// Something that can report a pending stop request.
pub trait Interrupt {
    /// Polled with the current depth after every unit of work.
    fn pending(&self, depth: u64) -> Option<Signal>;
}

/// Reads the process-wide record filled by the installed handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessSignals;

impl ProcessSignals {
    /// Install the recording handler. No SA_RESTART: blocking reads and
    /// waits return EINTR so the caller gets a chance to poll.
    pub fn install() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(record),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in HANDLED {
            // SAFETY: the handler only performs an atomic store.
            unsafe { sigaction(signal, &action) }
                .map_err(|source| Error::SignalSetup { signal, source })?;
        }
        Ok(Self)
    }

    /// Ignore further interrupts. Called once unwind starts so that a second
    /// signal cannot cut the bookkeeping short.
    pub fn disarm() -> Result<()> {
        let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        for signal in HANDLED {
            // SAFETY: SIG_IGN installs no code.
            unsafe { sigaction(signal, &action) }
                .map_err(|source| Error::SignalSetup { signal, source })?;
        }
        Ok(())
    }

    pub fn take() -> Option<Signal> {
        decode(PENDING.swap(0, Ordering::SeqCst))
    }
}

impl Interrupt for ProcessSignals {
    fn pending(&self, _depth: u64) -> Option<Signal> {
        decode(PENDING.load(Ordering::SeqCst))
    }
}

fn decode(signo: i32) -> Option<Signal> {
    if signo == 0 {
        return None;
    }
    Signal::try_from(signo).ok()
}

/// Never interrupts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Never;

impl Interrupt for Never {
    fn pending(&self, _depth: u64) -> Option<Signal> {
        None
    }
}
