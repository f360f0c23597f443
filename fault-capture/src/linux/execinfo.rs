//! FFI bindings for glibc's stack walking
//!
//! Neither function allocates once `backtrace` has been called at least once,
//! the first call lazily loads the unwinder from `libgcc_s`, see [`prime`].
//!
//! See [backtrace](https://man7.org/linux/man-pages/man3/backtrace.3.html)
//! for more information.

use libc::{c_int, c_void};

unsafe extern "C" {
    /// Walks the stack of the calling thread, storing up to `size` return
    /// addresses in `buffer`, returning the number of addresses stored.
    pub fn backtrace(buffer: *mut *mut c_void, size: c_int) -> c_int;
    /// Resolves each of the `size` addresses in `buffer` and writes one
    /// symbol per line to `fd`, without calling `malloc`.
    pub fn backtrace_symbols_fd(buffer: *const *mut c_void, size: c_int, fd: c_int);
}

/// Walks the current stack once outside of any signal handler so that the
/// unwinder library is loaded before it is needed in a compromised context.
pub(crate) fn prime() {
    let mut frames = [std::ptr::null_mut(); 4];

    // SAFETY: the buffer is valid for the length we pass
    unsafe {
        backtrace(frames.as_mut_ptr(), frames.len() as c_int);
    }
}
