use std::{io, mem};

/// The maximum size of core dump the OS may write when a fault takes its
/// default action.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CoreSize {
    /// As large as the hard limit allows
    #[default]
    Unlimited,
    /// At most this many bytes, clamped to the hard limit. 0 disables core
    /// dumps entirely.
    Bytes(u64),
}

/// Adjusts the soft `RLIMIT_CORE` limit of the current process, returning the
/// limit that is now in effect.
///
/// The soft limit can only ever be raised up to the hard limit, which
/// unprivileged processes cannot change.
///
/// # Errors
///
/// The limit could not be queried or set
pub fn set_max_core_size(size: CoreSize) -> io::Result<CoreSize> {
    // SAFETY: syscalls
    unsafe {
        let mut rlim: libc::rlimit = mem::zeroed();
        if libc::getrlimit(libc::RLIMIT_CORE, &mut rlim) != 0 {
            return Err(io::Error::last_os_error());
        }

        rlim.rlim_cur = match size {
            CoreSize::Unlimited => rlim.rlim_max,
            CoreSize::Bytes(bytes) if rlim.rlim_max == libc::RLIM_INFINITY => bytes as _,
            CoreSize::Bytes(bytes) => (bytes as libc::rlim_t).min(rlim.rlim_max),
        };

        if libc::setrlimit(libc::RLIMIT_CORE, &rlim) != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(if rlim.rlim_cur == libc::RLIM_INFINITY {
            CoreSize::Unlimited
        } else {
            CoreSize::Bytes(rlim.rlim_cur as u64)
        })
    }
}
