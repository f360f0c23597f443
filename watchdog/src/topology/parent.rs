use super::Role;
use crate::Error;
use std::{
    io, mem, ptr,
    sync::atomic::{AtomicBool, AtomicI32, Ordering},
};

/// The pid of our child, ie. the monitored process
static MONITORED: AtomicI32 = AtomicI32::new(0);
/// Set once the monitored process has exited
static EXITED: AtomicBool = AtomicBool::new(false);

/// The parent is the watchdog
#[inline]
pub(crate) fn roles(forked: libc::pid_t, parent: libc::pid_t) -> Role {
    if forked == 0 {
        Role::Monitored { watchdog: parent }
    } else {
        Role::Watchdog { monitored: forked }
    }
}

#[allow(unsafe_code)]
unsafe extern "C" fn on_child_exit(
    _signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _uc: *mut libc::c_void,
) {
    // SAFETY: the kernel hands us a valid siginfo, or null
    let Some(info) = (unsafe { info.as_ref() }) else {
        return;
    };

    // SAFETY: si_pid is valid for SIGCHLD
    if unsafe { info.si_pid() } == MONITORED.load(Ordering::Relaxed) {
        EXITED.store(true, Ordering::Release);
    }
}

#[allow(unsafe_code)]
pub(crate) fn arm(monitored: libc::pid_t) -> Result<(), Error> {
    MONITORED.store(monitored, Ordering::Relaxed);

    // SAFETY: syscalls
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_sigaction = on_child_exit as libc::sighandler_t;
        // We only care about termination, and the kernel reaps the child for us
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_NOCLDSTOP | libc::SA_NOCLDWAIT;

        if libc::sigaction(libc::SIGCHLD, &sa, ptr::null_mut()) == -1 {
            return Err(Error::Signal(io::Error::last_os_error()));
        }

        // The child may have exited before the handler was installed
        if libc::waitpid(monitored, ptr::null_mut(), libc::WNOHANG) == monitored {
            EXITED.store(true, Ordering::Release);
        }
    }

    super::ignore_signals()
}

#[inline]
pub(crate) fn counterpart_gone() -> bool {
    EXITED.load(Ordering::Acquire)
}

/// The watchdog is our parent, it exits on its own once the channel is
/// closed, so its status is never known to us
#[inline]
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn reap(_watchdog: libc::pid_t) -> io::Result<Option<i32>> {
    Ok(None)
}
