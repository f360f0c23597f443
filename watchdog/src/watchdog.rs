use crate::{ReceptionError, ReportReader};
use std::io::{Read, Write};

/// How the watchdog process exits
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// The channel was closed with no report in flight
    Clean,
    /// The channel ended partway through a report's signal information
    IncompleteHeader,
    /// The channel ended partway through a report's stack trace
    IncompleteStack,
}

impl ExitStatus {
    /// The status code the watchdog process exits with
    #[inline]
    pub fn code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::IncompleteHeader => 1,
            Self::IncompleteStack => 2,
        }
    }
}

/// Receives reports and writes a diagnostic for each of them
pub struct Watchdog<W> {
    out: W,
    reports: usize,
}

impl<W: Write> Watchdog<W> {
    pub fn new(out: W) -> Self {
        Self { out, reports: 0 }
    }

    /// Receives reports from `channel` until it is closed, writing each one
    /// as it arrives.
    ///
    /// A report that is cut short is written as far as it was received,
    /// followed by a line saying it is incomplete, and ends the run as
    /// nothing after it can be decoded.
    pub fn run(&mut self, channel: impl Read) -> ExitStatus {
        let mut reader = ReportReader::new(channel);

        log::debug!("watchdog waiting for reports");

        loop {
            match reader.next_report() {
                Ok(Some(report)) => {
                    self.reports += 1;
                    self.emit(format_args!("{report}\n"));
                }
                Ok(None) => {
                    log::debug!("channel closed after {} reports", self.reports);
                    return ExitStatus::Clean;
                }
                Err(err) => return self.fail(&err),
            }
        }
    }

    /// Writes the diagnostic for a report that could not be received,
    /// returning the status the watchdog should exit with
    pub fn fail(&mut self, err: &ReceptionError) -> ExitStatus {
        if let ReceptionError::IncompleteStack { report, .. } = err {
            self.emit(format_args!("{report}\n"));
        } else if let Some(partial) = err.partial_header().filter(|p| p.signo().is_some()) {
            self.emit(format_args!("{partial}\n"));
        }

        match std::error::Error::source(err) {
            Some(source) => self.emit(format_args!("[Watchdog] {err}: {source}\n")),
            None => self.emit(format_args!("[Watchdog] {err}\n")),
        }

        log::error!("failed to receive report: {err}");
        err.exit_status()
    }

    /// The number of complete reports received so far
    #[inline]
    pub fn reports(&self) -> usize {
        self.reports
    }

    #[inline]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, diag: std::fmt::Arguments<'_>) {
        if let Err(err) = self.out.write_fmt(diag).and_then(|()| self.out.flush()) {
            log::error!("failed to write report: {err}");
        }
    }
}
