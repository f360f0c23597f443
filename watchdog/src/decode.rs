use crate::ReceptionError;
use fault_report::{MAX_FRAMES, ReportHeader};
use std::{
    fmt,
    io::{self, BufRead, BufReader, ErrorKind, Read},
    mem::offset_of,
};

/// A report received from the monitored process
#[derive(Debug)]
pub struct FaultReport {
    pub header: ReportHeader,
    /// The symbolized stack, one newline terminated line per frame
    pub stack: String,
}

impl FaultReport {
    fn new(header: ReportHeader, stack: &[u8]) -> Self {
        Self {
            header,
            stack: String::from_utf8_lossy(stack).into_owned(),
        }
    }

    /// The lines of the stack trace
    #[inline]
    pub fn frames(&self) -> impl Iterator<Item = &str> {
        self.stack.lines()
    }

    /// The number of complete frames that were received
    #[inline]
    pub fn received_frames(&self) -> usize {
        self.stack.bytes().filter(|b| *b == b'\n').count()
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ReportHeader {
            signo,
            code,
            address,
            frames,
            ..
        } = self.header;

        write_summary(f, signo, Some(code), Some(address))?;
        write!(f, "\n[Watchdog] Stack trace ({frames} frames):")?;

        for frame in self.frames() {
            write!(f, "\n{frame}")?;
        }

        Ok(())
    }
}

fn write_summary(
    f: &mut fmt::Formatter<'_>,
    signo: i32,
    code: Option<i32>,
    address: Option<usize>,
) -> fmt::Result {
    write!(
        f,
        "[Watchdog] Monitored process received signal {} ({})",
        fault_report::signal_name(signo).unwrap_or("unknown signal"),
        fault_report::signal_description(signo).unwrap_or("no description"),
    )?;

    if let Some(code) = code {
        write!(f, ", code {code}")?;

        if let Some(name) = fault_report::code_name(signo, code) {
            write!(f, " ({name})")?;
        }
    }

    if let Some(address) = address {
        write!(f, ", address {address:#x}")?;
    }

    Ok(())
}

/// The start of a header, of which only the fields that were received in
/// full are available
#[derive(Copy, Clone, Debug)]
pub struct PartialHeader<'a>(&'a [u8]);

impl<'a> PartialHeader<'a> {
    #[inline]
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self(bytes)
    }

    fn field<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        self.0.get(offset..offset + N)?.try_into().ok()
    }

    pub fn signo(&self) -> Option<i32> {
        self.field::<4>(offset_of!(ReportHeader, signo))
            .map(i32::from_ne_bytes)
    }

    pub fn code(&self) -> Option<i32> {
        self.field::<4>(offset_of!(ReportHeader, code))
            .map(i32::from_ne_bytes)
    }

    pub fn address(&self) -> Option<usize> {
        self.field::<{ size_of::<usize>() }>(offset_of!(ReportHeader, address))
            .map(usize::from_ne_bytes)
    }
}

/// Writes nothing if not even the signal was received
impl fmt::Display for PartialHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signo() {
            Some(signo) => write_summary(f, signo, self.code(), self.address()),
            None => Ok(()),
        }
    }
}

/// Decodes the stream of reports written by the fault handler.
///
/// Reads are buffered, but nothing past the end of a report is consumed on its
/// behalf, so reports written back to back are decoded individually.
pub struct ReportReader<R> {
    inner: BufReader<R>,
}

impl<R: Read> ReportReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Reads the next complete report.
    ///
    /// Returns `Ok(None)` if the stream ended cleanly, ie. between two
    /// reports. Interrupted reads are retried.
    ///
    /// # Errors
    ///
    /// The stream ended, or failed, partway through a report. The error holds
    /// whatever part of the report was received.
    pub fn next_report(&mut self) -> Result<Option<FaultReport>, ReceptionError> {
        let Some(header) = self.read_header()? else {
            return Ok(None);
        };

        // Nothing after a corrupt header can be trusted to line up
        if header.frames as usize > MAX_FRAMES {
            return Err(ReceptionError::InvalidFrameCount { header });
        }

        self.read_stack(header).map(Some)
    }

    /// Fills the internal buffer, retrying interrupted reads
    fn fill(&mut self) -> io::Result<&[u8]> {
        loop {
            match self.inner.fill_buf() {
                Ok(_) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {
                    log::debug!("interrupted read, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(self.inner.buffer())
    }

    fn read_header(&mut self) -> Result<Option<ReportHeader>, ReceptionError> {
        let mut header = [0u8; ReportHeader::SIZE];
        let mut received = 0;

        while received < header.len() {
            let available = match self.fill() {
                Ok(available) => available,
                Err(err) => {
                    return Err(ReceptionError::IncompleteHeader {
                        received,
                        header,
                        source: Some(err),
                    });
                }
            };

            if available.is_empty() {
                if received == 0 {
                    return Ok(None);
                }

                return Err(ReceptionError::IncompleteHeader {
                    received,
                    header,
                    source: None,
                });
            }

            let len = available.len().min(header.len() - received);
            header[received..received + len].copy_from_slice(&available[..len]);
            self.inner.consume(len);
            received += len;
        }

        Ok(ReportHeader::from_bytes(&header))
    }

    fn read_stack(&mut self, header: ReportHeader) -> Result<FaultReport, ReceptionError> {
        let mut stack = Vec::new();
        let mut remaining = header.frames as usize;

        while remaining > 0 {
            let available = match self.fill() {
                Ok(available) => available,
                Err(err) => {
                    return Err(ReceptionError::IncompleteStack {
                        report: FaultReport::new(header, &stack),
                        source: Some(err),
                    });
                }
            };

            if available.is_empty() {
                return Err(ReceptionError::IncompleteStack {
                    report: FaultReport::new(header, &stack),
                    source: None,
                });
            }

            // Stop at the newline ending the last frame, anything after it
            // belongs to the next report
            let mut len = available.len();
            for (i, _) in available.iter().enumerate().filter(|(_, b)| **b == b'\n') {
                remaining -= 1;
                if remaining == 0 {
                    len = i + 1;
                    break;
                }
            }

            stack.extend_from_slice(&available[..len]);
            self.inner.consume(len);
        }

        Ok(FaultReport::new(header, &stack))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Encodes a report the way the fault handler writes it
    pub(crate) fn encode(header: ReportHeader, frames: &[&str]) -> Vec<u8> {
        let mut bytes = header.as_bytes().to_vec();
        for frame in frames {
            bytes.extend_from_slice(frame.as_bytes());
            bytes.push(b'\n');
        }
        bytes
    }

    /// A reader that hands out at most `chunk` bytes per read, and fails
    /// every other read with `EINTR` if `interrupt` is set
    pub(crate) struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
        interrupt: bool,
        interrupted: bool,
    }

    impl<'a> Trickle<'a> {
        pub(crate) fn new(data: &'a [u8], chunk: usize, interrupt: bool) -> Self {
            Self {
                data,
                chunk,
                interrupt,
                interrupted: false,
            }
        }
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupt && !self.interrupted {
                self.interrupted = true;
                return Err(io::Error::from_raw_os_error(libc::EINTR));
            }
            self.interrupted = false;

            let len = self.chunk.min(buf.len()).min(self.data.len());
            buf[..len].copy_from_slice(&self.data[..len]);
            self.data = &self.data[len..];
            Ok(len)
        }
    }

    fn sample_frames(count: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("./monitored(frame_{i}+0x{:x}) [0x55d0c0de{i:04x}]", i * 16))
            .collect()
    }

    #[test]
    fn decodes_regardless_of_read_size() {
        let frames = sample_frames(5);
        let frames: Vec<_> = frames.iter().map(String::as_str).collect();
        let header = ReportHeader::new(libc::SIGSEGV, 1, 0xabad_1dea, 5);
        let bytes = encode(header, &frames);

        for (chunk, interrupt) in [(usize::MAX, false), (1, false), (1, true), (7, true)] {
            let mut reader = ReportReader::new(Trickle::new(&bytes, chunk, interrupt));

            let report = reader.next_report().unwrap().expect("expected a report");
            assert_eq!(report.header, header, "chunk {chunk}");
            assert_eq!(report.frames().collect::<Vec<_>>(), frames);
            assert_eq!(report.received_frames(), 5);

            assert!(reader.next_report().unwrap().is_none());
        }
    }

    #[test]
    fn keeps_back_to_back_reports_apart() {
        let first = ReportHeader::new(libc::SIGTERM, -6, 0, 2);
        let second = ReportHeader::new(libc::SIGILL, 2, 0x1000, 3);

        let mut bytes = encode(first, &["a", "b"]);
        bytes.extend(encode(second, &["c", "d", "e"]));

        let mut reader = ReportReader::new(bytes.as_slice());

        let report = reader.next_report().unwrap().unwrap();
        assert_eq!(report.header, first);
        assert_eq!(report.stack, "a\nb\n");

        let report = reader.next_report().unwrap().unwrap();
        assert_eq!(report.header, second);
        assert_eq!(report.stack, "c\nd\ne\n");

        assert!(reader.next_report().unwrap().is_none());
    }

    #[test]
    fn frame_count_limits() {
        let empty = ReportHeader::new(libc::SIGABRT, -6, 0, 0);
        let bytes = encode(empty, &[]);
        let mut reader = ReportReader::new(Trickle::new(&bytes, 3, false));
        let report = reader.next_report().unwrap().unwrap();
        assert_eq!(report.header.frames, 0);
        assert!(report.stack.is_empty());

        let frames = sample_frames(fault_report::MAX_FRAMES);
        let frames: Vec<_> = frames.iter().map(String::as_str).collect();
        let full = ReportHeader::new(libc::SIGBUS, 2, 0x8, fault_report::MAX_FRAMES as u32);
        let bytes = encode(full, &frames);

        let mut reader = ReportReader::new(Trickle::new(&bytes, 13, true));
        let report = reader.next_report().unwrap().unwrap();
        assert_eq!(report.received_frames(), fault_report::MAX_FRAMES);
        assert_eq!(report.frames().last(), frames.last().copied());
    }

    #[test]
    fn truncated_header() {
        let header = ReportHeader::new(libc::SIGSEGV, 1, 0xdead, 1);
        let bytes = &encode(header, &["frame"])[..3];

        match ReportReader::new(bytes).next_report() {
            Err(ReceptionError::IncompleteHeader {
                received: 3,
                source: None,
                ..
            }) => {}
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn truncated_header_keeps_complete_fields() {
        let header = ReportHeader::new(libc::SIGSEGV, 1, 0xdead, 1);
        let bytes = encode(header, &["frame"]);

        let err = ReportReader::new(Trickle::new(&bytes[..16], 5, true))
            .next_report()
            .unwrap_err();
        let partial = err.partial_header().unwrap();
        assert_eq!(partial.signo(), Some(libc::SIGSEGV));
        assert_eq!(partial.code(), Some(1));
        assert_eq!(partial.address(), None);
        assert_eq!(
            partial.to_string(),
            "[Watchdog] Monitored process received signal SIGSEGV (Segmentation fault), code 1 (SEGV_MAPERR)"
        );

        // Not even the signal made it
        let err = ReportReader::new(&bytes[..2]).next_report().unwrap_err();
        let partial = err.partial_header().unwrap();
        assert_eq!(partial.signo(), None);
        assert!(partial.to_string().is_empty());
    }

    #[test]
    fn rejects_corrupt_frame_count() {
        let header = ReportHeader::new(libc::SIGSEGV, 1, 0xdead, 1000);
        let bytes = encode(header, &["frame"]);

        match ReportReader::new(bytes.as_slice()).next_report() {
            Err(err @ ReceptionError::InvalidFrameCount { .. }) => {
                assert_eq!(
                    err.to_string(),
                    format!(
                        "signal information corrupt, 1000 frames exceeds the maximum of {}",
                        fault_report::MAX_FRAMES
                    )
                );
                assert_eq!(err.exit_status().code(), 1);
                assert_eq!(err.partial_header().and_then(|p| p.address()), Some(0xdead));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn truncated_stack() {
        let frames = sample_frames(5);
        let frames: Vec<_> = frames.iter().map(String::as_str).collect();
        let header = ReportHeader::new(libc::SIGFPE, 1, 0x40_1000, 5);
        let mut bytes = encode(header, &frames[..2]);
        // A partial third line
        bytes.extend_from_slice(b"./monitored(fra");

        match ReportReader::new(Trickle::new(&bytes, 4, true)).next_report() {
            Err(err @ ReceptionError::IncompleteStack { .. }) => {
                assert_eq!(err.to_string(), "stack trace incomplete, received 2 of 5 frames");

                let ReceptionError::IncompleteStack { report, source } = err else {
                    unreachable!()
                };
                assert!(source.is_none());
                assert_eq!(report.header, header);
                assert_eq!(report.frames().take(2).collect::<Vec<_>>(), frames[..2]);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn read_failure() {
        struct Broken;

        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::from_raw_os_error(libc::EIO))
            }
        }

        match ReportReader::new(Broken).next_report() {
            Err(ReceptionError::IncompleteHeader {
                received: 0,
                source: Some(err),
                ..
            }) => assert_eq!(err.raw_os_error(), Some(libc::EIO)),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn describes_reports() {
        let header = ReportHeader::new(libc::SIGSEGV, 1, 0xabad_1dea, 2);
        let report = ReportReader::new(encode(header, &["one", "two"]).as_slice())
            .next_report()
            .unwrap()
            .unwrap();

        assert_eq!(
            report.to_string(),
            "[Watchdog] Monitored process received signal SIGSEGV (Segmentation fault), code 1 (SEGV_MAPERR), address 0xabad1dea\n\
             [Watchdog] Stack trace (2 frames):\n\
             one\n\
             two"
        );
    }
}
