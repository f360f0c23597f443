use super::{Signal, capture, execinfo};
use crate::{Classification, Error};
use std::{
    cell::UnsafeCell,
    io, mem,
    os::fd::{AsRawFd, OwnedFd},
    ptr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

/// The dispositions that were installed before we attached, so that signals
/// which should dump core can be re-raised with the original action.
///
/// Written once, while attaching and before our handler is installed, and
/// only published to the signal handler after that, so the handler can read
/// it without taking a lock.
struct DefaultActionTable {
    populated: AtomicBool,
    actions: UnsafeCell<[libc::sigaction; Signal::INTEREST.len()]>,
}

// SAFETY: `actions` is only written while `populated` is false and the
// `STATE` lock is held
unsafe impl Sync for DefaultActionTable {}

static DEFAULT_ACTIONS: DefaultActionTable = DefaultActionTable {
    populated: AtomicBool::new(false),
    actions: UnsafeCell::new(unsafe { mem::zeroed() }),
};

impl DefaultActionTable {
    #[inline]
    fn get(&self, signal: Signal) -> Option<libc::sigaction> {
        if !self.populated.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the table is immutable while it is published
        Some(unsafe { (*self.actions.get())[signal.index()] })
    }
}

/// Set by the signal handler when a [`Classification::Clean`] signal arrives
pub(super) static TERMINATION_REQUESTED: AtomicBool = AtomicBool::new(false);

struct Attached {
    /// Write end of the channel, its raw descriptor is what the signal
    /// handler actually writes to
    channel: OwnedFd,
    /// The dispositions of [`Signal::IGNORED`] before we ignored them
    ignored: [libc::sigaction; Signal::IGNORED.len()],
}

static STATE: parking_lot::Mutex<Option<Attached>> = parking_lot::const_mutex(None);

/// How long to sleep between checks for an in progress capture when detaching
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

#[inline]
fn signal_name(signo: i32) -> &'static str {
    fault_report::signal_name(signo).unwrap_or("unknown signal")
}

#[inline]
pub(super) fn default_action(signal: Signal) -> Option<libc::sigaction> {
    DEFAULT_ACTIONS.get(signal)
}

/// Stores the current disposition of every signal we are interested in.
///
/// # Safety
///
/// The `STATE` lock must be held and the table must not be published
unsafe fn record_default_actions() {
    unsafe {
        let actions = &mut *DEFAULT_ACTIONS.actions.get();

        for (sig, action) in Signal::INTEREST.into_iter().zip(actions.iter_mut()) {
            if libc::sigaction(sig as i32, ptr::null(), action) == -1 {
                log::error!(
                    "failed to query the current handler for {}, assuming the default: {}",
                    signal_name(sig as i32),
                    io::Error::last_os_error()
                );

                *action = mem::zeroed();
                action.sa_sigaction = libc::SIG_DFL;
            }
        }
    }

    DEFAULT_ACTIONS.populated.store(true, Ordering::Release);
}

/// Installs [`signal_handler`] for every signal we are interested in,
/// returning the signals it could not be installed for
unsafe fn install_handlers() -> Vec<Signal> {
    let mut failed = Vec::new();

    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);

        sa.sa_sigaction = signal_handler as libc::sighandler_t;
        // Run on the alternate stack if the thread has one, a stack overflow
        // leaves no room to run the handler on the faulting stack
        sa.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;

        // Each signal is independent, failing to install one doesn't stop us
        // from trying the rest
        for sig in Signal::INTEREST {
            if libc::sigaction(sig as i32, &sa, ptr::null_mut()) == -1 {
                log::error!(
                    "failed to set handler for {}: {}",
                    signal_name(sig as i32),
                    io::Error::last_os_error()
                );
                failed.push(sig);
            }
        }
    }

    failed
}

/// Ignores [`Signal::IGNORED`], returning their previous dispositions
unsafe fn ignore_signals() -> [libc::sigaction; Signal::IGNORED.len()] {
    unsafe {
        let mut previous: [libc::sigaction; Signal::IGNORED.len()] = mem::zeroed();

        let mut sa: libc::sigaction = mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_sigaction = libc::SIG_IGN;

        for (signo, prev) in Signal::IGNORED.into_iter().zip(previous.iter_mut()) {
            if libc::sigaction(signo, &sa, prev) == -1 {
                log::error!(
                    "failed to ignore {}: {}",
                    signal_name(signo),
                    io::Error::last_os_error()
                );
                prev.sa_sigaction = libc::SIG_DFL;
            }
        }

        previous
    }
}

/// Restores the signal handler for the specified signal back to its default
/// handler, which _should_ perform the default signal action as seen in
/// <https://man7.org/linux/man-pages/man7/signal.7.html>
#[inline]
unsafe fn install_default_handler(signo: i32) {
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
    }
}

/// Restores all of the signal handlers back to their previous values, or the
/// default if the previous value cannot be restored
unsafe fn restore_handlers(ignored: &[libc::sigaction; Signal::IGNORED.len()]) {
    unsafe {
        for sig in Signal::INTEREST {
            let restored = DEFAULT_ACTIONS
                .get(sig)
                .is_some_and(|action| libc::sigaction(sig as i32, &action, ptr::null_mut()) == 0);

            if !restored {
                install_default_handler(sig as i32);
            }
        }

        for (signo, action) in Signal::IGNORED.into_iter().zip(ignored.iter()) {
            if libc::sigaction(signo, action, ptr::null_mut()) == -1 {
                install_default_handler(signo);
            }
        }
    }
}

pub(super) fn attach(channel: OwnedFd) -> Result<Vec<Signal>, Error> {
    let mut lock = STATE.lock();

    if lock.is_some() {
        return Err(Error::HandlerAlreadyInstalled);
    }

    // Catch being handed the wrong end of the pipe now, in the handler a
    // failed write is silently dropped
    // SAFETY: syscall
    let flags = unsafe { libc::fcntl(channel.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error().into());
    }
    if flags & libc::O_ACCMODE == libc::O_RDONLY {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "channel is not writable").into());
    }

    execinfo::prime();

    // SAFETY: syscalls, and we hold the lock
    let (failed, ignored) = unsafe {
        record_default_actions();

        capture::publish_channel(channel.as_raw_fd());

        (install_handlers(), ignore_signals())
    };

    log::debug!(
        "attached fault handler for {} of {} signals",
        Signal::INTEREST.len() - failed.len(),
        Signal::INTEREST.len()
    );

    *lock = Some(Attached { channel, ignored });

    Ok(failed)
}

/// Detaches our signal handler, restoring the previously installed or default
/// handlers, and closes the channel once no capture is in progress
pub(super) fn detach() {
    let mut lock = STATE.lock();

    if let Some(attached) = lock.take() {
        // SAFETY: syscalls
        unsafe {
            restore_handlers(&attached.ignored);
        }

        capture::unpublish_channel();

        while let Some(tid) = capture::CAPTURE_LOCK.holder() {
            log::debug!("waiting for in progress capture on thread {tid} to finish");
            std::thread::sleep(DRAIN_INTERVAL);
        }

        DEFAULT_ACTIONS.populated.store(false, Ordering::Release);

        // Closes the write end, if this was the last one the watchdog will
        // see the end of the stream
        drop(attached);

        log::debug!("detached fault handler");
    }
}

/// Re-installs the disposition that was in place before we attached, so that
/// re-raising the signal performs that action instead of calling us again
#[inline]
unsafe fn rearm_default_action(signal: Signal) {
    unsafe {
        match DEFAULT_ACTIONS.get(signal) {
            Some(action) if libc::sigaction(signal as i32, &action, ptr::null_mut()) == 0 => {}
            _ => install_default_handler(signal as i32),
        }
    }
}

/// This is the actual function installed for each signal we support, invoked
/// by the kernel
unsafe extern "C" fn signal_handler(
    signo: libc::c_int,
    info: *mut libc::siginfo_t,
    _uc: *mut libc::c_void,
) {
    let Some(signal) = Signal::from_raw(signo) else {
        return;
    };

    unsafe {
        let (code, address) = match info.as_ref() {
            Some(info) => (info.si_code, capture::fault_address(info)),
            None => (0, 0),
        };

        capture::capture_and_transmit(signo, code, address);

        match signal.classification() {
            Classification::CoreDump => {
                debug_print!("restoring default action and re-raising");

                // The signal is blocked while we are in the handler, so it will
                // be delivered with the original action as soon as we return
                rearm_default_action(signal);
                libc::raise(signo);
            }
            Classification::Clean => {
                debug_print!("termination requested");
                TERMINATION_REQUESTED.store(true, Ordering::Release);
            }
            Classification::Fatal => {
                debug_print!("signal is fatal, exiting");

                // Flush anything buffered by C stdio, Rust's std streams are
                // line buffered and have nothing we could safely flush here
                libc::fflush(ptr::null_mut());
                libc::_exit(128 + signo);
            }
            Classification::Ignored => {}
        }
    }
}
