use super::Role;
use crate::Error;
use std::{
    io,
    sync::atomic::{AtomicI32, Ordering},
};

/// The pid of our parent, ie. the monitored process, as it was at fork time
static MONITORED: AtomicI32 = AtomicI32::new(0);

/// The child is the watchdog
#[inline]
pub(crate) fn roles(forked: libc::pid_t, parent: libc::pid_t) -> Role {
    if forked == 0 {
        Role::Watchdog { monitored: parent }
    } else {
        Role::Monitored { watchdog: forked }
    }
}

pub(crate) fn arm(monitored: libc::pid_t) -> Result<(), Error> {
    MONITORED.store(monitored, Ordering::Relaxed);
    super::ignore_signals()
}

/// Once the monitored process exits we are reparented, so our parent pid no
/// longer matches it
#[allow(unsafe_code)]
pub(crate) fn counterpart_gone() -> bool {
    // SAFETY: syscall
    unsafe { libc::getppid() != MONITORED.load(Ordering::Relaxed) }
}

/// Waits for the watchdog to exit after the channel was closed, returning its
/// exit code, or `128 + signal` if it was killed. `None` if it had already
/// been reaped.
#[allow(unsafe_code)]
pub(crate) fn reap(watchdog: libc::pid_t) -> io::Result<Option<i32>> {
    let mut status = 0;

    loop {
        // SAFETY: syscall
        if unsafe { libc::waitpid(watchdog, &mut status, 0) } != -1 {
            let code = if libc::WIFEXITED(status) {
                log::debug!("watchdog {watchdog} exited with {}", libc::WEXITSTATUS(status));
                libc::WEXITSTATUS(status)
            } else {
                log::warn!("watchdog {watchdog} terminated abnormally, status {status:#x}");
                128 + libc::WTERMSIG(status)
            };

            return Ok(Some(code));
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINTR) => {}
            // Already reaped by the OS while child exits were ignored
            Some(libc::ECHILD) => return Ok(None),
            _ => return Err(err),
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod test {
    use super::*;

    #[test]
    fn notices_reparenting() {
        // SAFETY: syscall
        let parent = unsafe { libc::getppid() };

        MONITORED.store(parent, Ordering::Relaxed);
        assert!(!counterpart_gone());

        // As if the monitored process had exited and we were adopted
        MONITORED.store(parent + 1, Ordering::Relaxed);
        assert!(counterpart_gone());

        MONITORED.store(0, Ordering::Relaxed);
    }

    fn spawn_exiting(code: i32) -> libc::pid_t {
        // SAFETY: the child only calls _exit, which is async signal safe
        unsafe {
            let pid = libc::fork();
            assert_ne!(pid, -1, "{}", io::Error::last_os_error());

            if pid == 0 {
                libc::_exit(code);
            }

            pid
        }
    }

    #[test]
    fn reaps_exit_codes() {
        for code in [0, 1, 2] {
            let pid = spawn_exiting(code);
            assert_eq!(reap(pid).unwrap(), Some(code));
            // Already gone
            assert_eq!(reap(pid).unwrap(), None);
        }
    }
}
