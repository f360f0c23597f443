//! Ways for the crash-client to hurt itself

#![allow(unsafe_code)]

/// The address [`raise_segfault`] writes to
pub const SEGFAULT_ADDRESS: usize = 0xabad_1dea;

/// The pointer [`raise_segfault`] writes through. A byte, so that debug
/// builds don't catch a misaligned write with a panic before the hardware
/// gets a chance to fault.
#[inline]
pub fn segfault_pointer() -> *mut u8 {
    SEGFAULT_ADDRESS as *mut u8
}

/// Raises `SIGSEGV` by writing to an unmapped address
pub fn raise_segfault() {
    // SAFETY: it isn't, that's the point
    unsafe {
        std::ptr::write_volatile(segfault_pointer(), 0xde);
    }
}

/// Raises `SIGFPE` with an integer division by zero
pub fn raise_floating_point_exception() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            // SAFETY: it isn't, that's the point
            unsafe {
                std::arch::asm!(
                    "mov eax, 1",
                    "cdq",
                    "mov {div:e}, 0",
                    "idiv {div:e}",
                    div = out(reg) _,
                    out("eax") _,
                    out("edx") _,
                );
            }
        } else {
            // Integer division by zero doesn't trap on aarch64
            raise(libc::SIGFPE);
        }
    }
}

/// Raises `SIGILL` by executing an undefined instruction
pub fn raise_illegal_instruction() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            // SAFETY: it isn't, that's the point
            unsafe { std::arch::asm!("ud2") };
        } else if #[cfg(target_arch = "aarch64")] {
            // SAFETY: it isn't, that's the point
            unsafe { std::arch::asm!("udf #0") };
        } else {
            raise(libc::SIGILL);
        }
    }
}

/// Raises `SIGTRAP` with a breakpoint instruction
pub fn raise_trap() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            // SAFETY: it isn't, that's the point
            unsafe { std::arch::asm!("int3") };
        } else if #[cfg(target_arch = "aarch64")] {
            // SAFETY: it isn't, that's the point
            unsafe { std::arch::asm!("brk #0") };
        } else {
            raise(libc::SIGTRAP);
        }
    }
}

/// Raises `SIGBUS` by reading from a mapping that extends past the end of
/// the empty file backing it
pub fn raise_bus_error() {
    // SAFETY: syscalls, and then a read that isn't safe, that's the point
    unsafe {
        let fd = libc::memfd_create(c"sadness".as_ptr(), libc::MFD_CLOEXEC);
        if fd == -1 {
            raise(libc::SIGBUS);
            return;
        }

        let map = libc::mmap(
            std::ptr::null_mut(),
            4096,
            libc::PROT_READ,
            libc::MAP_SHARED,
            fd,
            0,
        );
        if map == libc::MAP_FAILED {
            raise(libc::SIGBUS);
            return;
        }

        std::ptr::read_volatile(map.cast::<u8>());
    }
}

/// Raises `SIGABRT`
pub fn raise_abort() {
    std::process::abort();
}

/// Sends the specified signal to the calling thread
pub fn raise(signo: i32) {
    // SAFETY: syscall
    unsafe {
        libc::raise(signo);
    }
}
