//! SIGINT bookkeeping. The handler only records that an interrupt arrived;
//! the child tool receives the same terminal signal and exits on its own, and
//! the orchestrator checks [`triggered`] after every backend call.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: nix::libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn install() -> Result<()> {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGINT, &action) }.context("Failed to install SIGINT handler")?;
    Ok(())
}

pub fn triggered() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn clear() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
pub(crate) fn simulate() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}
