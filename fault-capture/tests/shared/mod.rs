#![allow(dead_code, unsafe_code)]

use fault_report::ReportHeader;
use std::{
    fs::File,
    io::Read,
    os::fd::{FromRawFd, OwnedFd},
};

/// Creates a pipe, returning the read end as a file and the write end as the
/// channel to attach the handler to
pub fn pipe() -> (File, OwnedFd) {
    let mut fds = [0; 2];
    assert_eq!(
        unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) },
        0,
        "failed to create pipe: {}",
        std::io::Error::last_os_error()
    );

    unsafe { (File::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// The dispositions of every handled signal
pub fn current_actions() -> Vec<libc::sigaction> {
    fault_capture::Signal::INTEREST
        .into_iter()
        .map(|sig| unsafe {
            let mut action = std::mem::zeroed();
            assert_eq!(
                libc::sigaction(sig as i32, std::ptr::null(), &mut action),
                0
            );
            action
        })
        .collect()
}

pub fn current_action(signo: i32) -> libc::sighandler_t {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        assert_eq!(libc::sigaction(signo, std::ptr::null(), &mut action), 0);
        action.sa_sigaction
    }
}

/// Splits everything read from the channel into reports, asserting that each
/// is complete
pub fn split_reports(mut bytes: &[u8]) -> Vec<(ReportHeader, Vec<String>)> {
    let mut reports = Vec::new();

    while !bytes.is_empty() {
        let header = ReportHeader::from_bytes(&bytes[..ReportHeader::SIZE])
            .expect("truncated report header");
        bytes = &bytes[ReportHeader::SIZE..];

        let mut lines = Vec::new();
        for _ in 0..header.frames {
            let end = bytes
                .iter()
                .position(|b| *b == b'\n')
                .expect("truncated stack trace");
            lines.push(String::from_utf8_lossy(&bytes[..end]).into_owned());
            bytes = &bytes[end + 1..];
        }

        reports.push((header, lines));
    }

    reports
}

pub fn read_to_end(mut file: File) -> Vec<u8> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).expect("failed to read channel");
    bytes
}
