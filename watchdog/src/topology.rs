//! Which side of the `fork` the watchdog ends up on, and how it finds out that
//! the monitored process has gone away.

use crate::Error;
use std::{io, mem, ptr};

cfg_if::cfg_if! {
    if #[cfg(feature = "watchdog-is-parent")] {
        mod parent;
        pub(crate) use parent::{arm, counterpart_gone, reap, roles};

        /// Whether the watchdog is the parent of the monitored process
        pub const WATCHDOG_IS_PARENT: bool = true;
    } else {
        mod child;
        pub(crate) use child::{arm, counterpart_gone, reap, roles};

        /// Whether the watchdog is the parent of the monitored process
        pub const WATCHDOG_IS_PARENT: bool = false;
    }
}

/// The process each side of the `fork` plays
pub(crate) enum Role {
    /// We are the watchdog for the specified process
    Watchdog { monitored: libc::pid_t },
    /// We are the monitored process, with the specified watchdog
    Monitored { watchdog: libc::pid_t },
}

/// Ignores the signals the watchdog must survive to do its job.
///
/// Writing to the pipe is the monitored process' business, and interrupts and
/// quits from the terminal are delivered to the whole process group, the
/// watchdog must outlive the monitored process to report them.
#[allow(unsafe_code)]
fn ignore_signals() -> Result<(), Error> {
    // SAFETY: syscalls
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_sigaction = libc::SIG_IGN;

        for signo in [libc::SIGPIPE, libc::SIGINT, libc::SIGQUIT] {
            if libc::sigaction(signo, &sa, ptr::null_mut()) == -1 {
                return Err(Error::Signal(io::Error::last_os_error()));
            }
        }
    }

    Ok(())
}
