//! [`FaultHandler`] captures the details of a fault when it occurs and hands
//! them to a watchdog process over a pipe, so that reporting them never has to
//! happen in the compromised context of the faulting process.
//!
//! # Linux
//!
//! On Linux this is done by handling [signals](https://man7.org/linux/man-pages/man7/signal.7.html),
//! namely the following
//!
//! ## `SIGSEGV`, `SIGFPE`, `SIGQUIT`
//!
//! An invalid memory reference, an erroneous arithmetic operation, or a quit
//! request from the terminal. After the report is sent the original action is
//! restored and the signal is raised again, so that the process still
//! terminates with a core dump.
//!
//! ## `SIGTERM`
//!
//! A request to terminate gracefully. The report is sent and the handler
//! returns, the process is not terminated, see [`termination_requested`].
//!
//! ## `SIGILL`, `SIGHUP`, `SIGTRAP`, `SIGABRT`, `SIGBUS`, `SIGINT`
//!
//! Everything else we handle is fatal, after the report is sent the process
//! exits immediately with `128 + signal`.
//!
//! `SIGCHLD` and `SIGPIPE` are ignored while the handler is attached.
//!
//! # Signal safety
//!
//! Only a small subset of libc functions are
//! [async signal safe](https://man7.org/linux/man-pages/man7/signal-safety.7.html),
//! so the handler never allocates, never takes an OS lock, and never touches
//! buffered output. The stack is walked with glibc's `backtrace` into a static
//! buffer and symbolized directly onto the pipe with `backtrace_symbols_fd`.
//! Threads that fault concurrently are serialized with a spin lock, so reports
//! are never interleaved on the pipe.

#![allow(unsafe_code)]

mod error;

pub use error::Error;

#[cfg(feature = "debug-print")]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {
        let cstr = concat!($s, "\n");
        $crate::write_stderr(cstr);
    };
}

#[cfg(not(feature = "debug-print"))]
#[macro_export]
macro_rules! debug_print {
    ($s:literal) => {};
}

/// Writes the specified string directly to stderr.
///
/// This is safe to be called from within a compromised context.
#[inline]
pub fn write_stderr(s: &'static str) {
    unsafe {
        libc::write(2, s.as_ptr().cast(), s.len());
    }
}

/// What the signal handler does once a report has been sent
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Re-raise with the original disposition so that the OS dumps core
    CoreDump,
    /// A graceful termination request, the handler returns normally
    Clean,
    /// Terminate the process immediately
    Fatal,
    /// Never handled
    Ignored,
}

cfg_if::cfg_if! {
    if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
        mod linux;

        pub use linux::{
            CoreSize, FaultHandler, Signal, default_action, set_max_core_size,
            termination_requested,
        };
    } else {
        compile_error!("unimplemented target platform");
    }
}
