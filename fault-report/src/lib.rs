//! The wire format used to forward a fault from the process it occurred in to
//! the watchdog process that reports it.
//!
//! A report is a fixed size [`ReportHeader`] immediately followed by exactly
//! [`ReportHeader::frames`] newline terminated lines of symbolized stack
//! frames. There is no length prefix for the stack text, the reader finds its
//! end by counting newlines.
//!
//! The header is written in the native layout of the machine, both ends of the
//! channel are forks of the same executable so they always agree on it.

// crate-specific exceptions:
#![allow(unsafe_code)]

cfg_if::cfg_if! {
    if #[cfg(not(all(target_os = "linux", target_env = "gnu")))] {
        compile_error!("unimplemented target platform");
    }
}

mod names;

pub use names::{code_name, signal_description, signal_name};

/// The maximum depth of the stack walk performed when a fault is captured
pub const MAX_FRAMES: usize = 64;

/// The fixed size portion of a fault report.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ReportHeader {
    /// The signal number, eg. `SIGSEGV`
    pub signo: i32,
    /// The `si_code` of the signal, describing why it was raised
    pub code: i32,
    /// The faulting address, only meaningful for signals raised by a hardware
    /// fault, 0 for everything else
    pub address: usize,
    /// The number of stack frame lines that follow this header
    pub frames: u32,
    /// Always 0, keeps the layout free of implicit padding
    reserved: u32,
}

impl ReportHeader {
    /// The number of bytes the header occupies on the wire
    pub const SIZE: usize = std::mem::size_of::<Self>();

    #[inline]
    pub const fn new(signo: i32, code: i32, address: usize, frames: u32) -> Self {
        Self {
            signo,
            code,
            address,
            frames,
            reserved: 0,
        }
    }

    /// The raw bytes of the header, as written to the channel.
    ///
    /// This does not allocate and is safe to call from a signal handler.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe {
            let ptr = (self as *const Self).cast();
            std::slice::from_raw_parts(ptr, Self::SIZE)
        }
    }

    /// Reconstructs a header from the bytes read off the channel, returning
    /// `None` if the buffer is not exactly [`Self::SIZE`] bytes.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != Self::SIZE {
            return None;
        }

        // The buffer has no alignment guarantees
        Some(unsafe { std::ptr::read_unaligned(buf.as_ptr().cast::<Self>()) })
    }
}
