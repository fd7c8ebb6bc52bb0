//! Interrupt (SIGINT) handling.
//!
//! The first ^C sets a flag the scheduler polls between dispatches; the
//! same signal reaches the child processes (shared process group), which
//! fail and report as interrupted.  The handler then restores the default
//! disposition, so a second ^C kills the process outright.

use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// The cancellation token checked by the scheduler's dispatch loop.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

#[cfg(unix)]
fn sigint_action(handler: libc::sighandler_t) {
    // Safety: registering a signal handler is libc unsafe code.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = handler;
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigint_handler(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
    sigint_action(libc::SIG_DFL as libc::sighandler_t);
}

#[cfg(unix)]
pub fn install() {
    sigint_action(sigint_handler as libc::sighandler_t);
}

#[cfg(not(unix))]
pub fn install() {}
