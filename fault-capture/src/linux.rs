mod capture;
mod core_limit;
mod execinfo;
mod spin;
mod state;

pub use core_limit::{CoreSize, set_max_core_size};

use crate::{Classification, Error};
use std::os::fd::OwnedFd;

/// The signals that we install a handler for
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Signal {
    Segv = libc::SIGSEGV,
    Illegal = libc::SIGILL,
    Hangup = libc::SIGHUP,
    Quit = libc::SIGQUIT,
    Trap = libc::SIGTRAP,
    /// Also known as `SIGIOT`
    Abort = libc::SIGABRT,
    Bus = libc::SIGBUS,
    Fpe = libc::SIGFPE,
    Term = libc::SIGTERM,
    Interrupt = libc::SIGINT,
}

impl Signal {
    /// Every signal we handle, in the order their previous dispositions are
    /// recorded
    pub const INTEREST: [Self; 10] = [
        Self::Segv,
        Self::Illegal,
        Self::Hangup,
        Self::Quit,
        Self::Trap,
        Self::Abort,
        Self::Bus,
        Self::Fpe,
        Self::Term,
        Self::Interrupt,
    ];

    /// Signals that are ignored outright while the handler is attached.
    ///
    /// A child changing state or a write to a closed pipe are both things a
    /// real program might want to react to (eg. the watchdog itself going
    /// away), but here they are only noise.
    pub const IGNORED: [i32; 2] = [libc::SIGCHLD, libc::SIGPIPE];

    #[inline]
    pub fn from_raw(signo: i32) -> Option<Self> {
        Self::INTEREST.into_iter().find(|sig| *sig as i32 == signo)
    }

    #[inline]
    pub fn classification(self) -> Classification {
        match self {
            Self::Segv | Self::Fpe | Self::Quit => Classification::CoreDump,
            Self::Term => Classification::Clean,
            Self::Illegal
            | Self::Hangup
            | Self::Trap
            | Self::Abort
            | Self::Bus
            | Self::Interrupt => Classification::Fatal,
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        Self::INTEREST
            .iter()
            .position(|sig| *sig == self)
            .unwrap_or_default()
    }
}

impl Classification {
    /// Classifies a raw signal number, returning `None` for signals that are
    /// neither handled nor ignored
    pub fn of(signo: i32) -> Option<Self> {
        if let Some(sig) = Signal::from_raw(signo) {
            Some(sig.classification())
        } else if Signal::IGNORED.contains(&signo) {
            Some(Self::Ignored)
        } else {
            None
        }
    }
}

/// The handler address that was installed for `signal` before the
/// [`FaultHandler`] was attached, ie. the action that is restored before
/// re-raising signals that should produce a core dump.
///
/// Returns `None` if no handler is attached.
pub fn default_action(signal: Signal) -> Option<libc::sighandler_t> {
    state::default_action(signal).map(|sa| sa.sa_sigaction)
}

/// Whether a graceful termination has been requested via a
/// [`Classification::Clean`] signal since the process started.
#[inline]
pub fn termination_requested() -> bool {
    state::TERMINATION_REQUESTED.load(std::sync::atomic::Ordering::Acquire)
}

/// A Linux signal handler that forwards fault reports to a watchdog
pub struct FaultHandler {
    failed: Vec<Signal>,
}

impl FaultHandler {
    /// Attaches the signal handler, which writes a report to `channel` for
    /// every signal in [`Signal::INTEREST`] that is raised.
    ///
    /// `channel` is the write end of the pipe the watchdog reads from, the
    /// handler takes ownership of it and closes it when detached.
    ///
    /// Failing to install the handler for an individual signal is logged and
    /// does not prevent the handler being installed for the others, see
    /// [`Self::failed_signals`].
    ///
    /// # Errors
    ///
    /// Only one [`FaultHandler`] can be attached at a time
    pub fn attach(channel: OwnedFd) -> Result<Self, Error> {
        let failed = state::attach(channel)?;
        Ok(Self { failed })
    }

    /// The signals that a handler could not be installed for
    #[inline]
    pub fn failed_signals(&self) -> &[Signal] {
        &self.failed
    }

    /// Detaches the handler, waiting for any in progress capture to finish and
    /// then closing the channel.
    ///
    /// This is done automatically when this [`FaultHandler`] is dropped.
    #[inline]
    pub fn detach(self) {
        state::detach();
    }

    /// Captures and transmits a report for the specified signal on the
    /// calling thread exactly as the signal handler would, but without
    /// performing the action the signal is classified with.
    ///
    /// `address` is reported as the faulting address for signals that have
    /// one.
    #[allow(clippy::unused_self)]
    pub fn simulate_signal(&self, signal: Signal, address: usize) -> Classification {
        let address = match signal {
            Signal::Segv | Signal::Bus | Signal::Illegal | Signal::Fpe | Signal::Trap => address,
            _ => 0,
        };

        // SI_USER
        capture::capture_and_transmit(signal as i32, 0, address);
        signal.classification()
    }
}

impl Drop for FaultHandler {
    fn drop(&mut self) {
        state::detach();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_interest_set() {
        use Classification as C;

        for (sig, expected) in [
            (libc::SIGSEGV, C::CoreDump),
            (libc::SIGFPE, C::CoreDump),
            (libc::SIGQUIT, C::CoreDump),
            (libc::SIGTERM, C::Clean),
            (libc::SIGILL, C::Fatal),
            (libc::SIGHUP, C::Fatal),
            (libc::SIGTRAP, C::Fatal),
            (libc::SIGIOT, C::Fatal),
            (libc::SIGBUS, C::Fatal),
            (libc::SIGINT, C::Fatal),
            (libc::SIGCHLD, C::Ignored),
            (libc::SIGPIPE, C::Ignored),
        ] {
            assert_eq!(C::of(sig), Some(expected), "signal {sig}");
        }

        assert_eq!(C::of(libc::SIGUSR1), None);
        assert_eq!(C::of(libc::SIGKILL), None);
    }

    #[test]
    fn round_trips_raw() {
        for (i, sig) in Signal::INTEREST.into_iter().enumerate() {
            assert_eq!(Signal::from_raw(sig as i32), Some(sig));
            assert_eq!(sig.index(), i);
        }

        assert!(Signal::from_raw(libc::SIGCHLD).is_none());
    }
}
