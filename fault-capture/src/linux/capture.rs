//! The body of the signal handler that captures and transmits a report.
//!
//! Everything reachable from [`capture_and_transmit`] runs in a signal handler,
//! so it may only call [async signal safe](https://man7.org/linux/man-pages/man7/signal-safety.7.html)
//! functions and must never allocate.

use super::{execinfo, spin::SpinLock};
use fault_report::{MAX_FRAMES, ReportHeader};
use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicI32, Ordering},
};

/// The write end of the channel to the watchdog, or -1 if there is none
static CHANNEL_FD: AtomicI32 = AtomicI32::new(-1);

/// Serializes faulting threads so that reports are never interleaved
pub(crate) static CAPTURE_LOCK: SpinLock = SpinLock::new();

/// Frame storage, large stacks of return addresses are kept out of the
/// (possibly alternate, and small) signal stack
struct FrameBuffer(UnsafeCell<[*mut libc::c_void; MAX_FRAMES]>);

// SAFETY: only ever accessed while holding `CAPTURE_LOCK`
unsafe impl Sync for FrameBuffer {}

static FRAMES: FrameBuffer = FrameBuffer(UnsafeCell::new([std::ptr::null_mut(); MAX_FRAMES]));

#[inline]
pub(crate) fn publish_channel(fd: i32) {
    CHANNEL_FD.store(fd, Ordering::Release);
}

#[inline]
pub(crate) fn unpublish_channel() {
    CHANNEL_FD.store(-1, Ordering::Release);
}

#[inline]
pub(crate) fn current_tid() -> i32 {
    // SAFETY: syscall
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Only signals raised by a hardware fault fill in `si_addr`, for everything
/// else the same union slot holds the sender's pid and uid
#[inline]
fn has_fault_address(signo: i32) -> bool {
    matches!(
        signo,
        libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE | libc::SIGTRAP
    )
}

/// Extracts the faulting address from the signal information
///
/// # Safety
///
/// `info` must be the `siginfo_t` the kernel passed to the handler
#[inline]
pub(crate) unsafe fn fault_address(info: &libc::siginfo_t) -> usize {
    if has_fault_address(info.si_signo) {
        unsafe { info.si_addr() as usize }
    } else {
        0
    }
}

/// Walks the stack and writes a complete report to the watchdog channel.
///
/// If the channel has already been torn down this does nothing, and if the
/// calling thread is already inside this function (ie. capturing faulted)
/// the nested capture is skipped as it could never acquire the lock.
///
/// Failed writes are intentionally ignored, there is nothing that can be
/// safely done about them from here, so the report is lost.
pub(crate) fn capture_and_transmit(signo: i32, code: i32, address: usize) {
    if !CAPTURE_LOCK.lock(current_tid()) {
        debug_print!("fault during capture, skipping nested capture");
        return;
    }

    debug_print!("acquired capture lock");

    // Loaded under the lock, teardown waits for the lock to be released
    // before it closes the descriptor
    let fd = CHANNEL_FD.load(Ordering::Acquire);
    if fd < 0 {
        debug_print!("no channel, skipping capture");
        CAPTURE_LOCK.unlock();
        return;
    }

    // SAFETY: we hold the capture lock, so we have exclusive access to the
    // frame buffer, the rest are syscalls
    unsafe {
        let frames = &mut *FRAMES.0.get();

        let depth = execinfo::backtrace(frames.as_mut_ptr(), MAX_FRAMES as libc::c_int).max(0);

        let header = ReportHeader::new(signo, code, address, depth as u32);
        let bytes = header.as_bytes();

        // The header is smaller than PIPE_BUF so this write is atomic
        let _ = libc::write(fd, bytes.as_ptr().cast(), bytes.len());
        debug_print!("wrote report header");

        execinfo::backtrace_symbols_fd(frames.as_ptr(), depth, fd);
        debug_print!("wrote stack trace");
    }

    CAPTURE_LOCK.unlock();
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fault_addresses() {
        for signo in [
            libc::SIGSEGV,
            libc::SIGBUS,
            libc::SIGILL,
            libc::SIGFPE,
            libc::SIGTRAP,
        ] {
            assert!(has_fault_address(signo));
        }

        for signo in [
            libc::SIGTERM,
            libc::SIGINT,
            libc::SIGHUP,
            libc::SIGQUIT,
            libc::SIGABRT,
        ] {
            assert!(!has_fault_address(signo));
        }
    }
}
