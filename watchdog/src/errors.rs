use crate::{ExitStatus, FaultReport, decode::PartialHeader};
use fault_report::{MAX_FRAMES, ReportHeader};
use std::io;

/// An error that can occur while starting or stopping the watchdog
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to create the watchdog channel")]
    Channel(#[source] io::Error),
    #[error("failed to fork the watchdog process")]
    Fork(#[source] io::Error),
    #[error("failed to install the watchdog's signal handling")]
    Signal(#[source] io::Error),
    #[error(transparent)]
    Handler(#[from] fault_capture::Error),
    #[error("the watchdog exited with {0}")]
    WatchdogFailed(i32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The code the monitored process should exit with if it cannot continue
    /// without a watchdog, the `errno` of the failed call where there is one,
    /// or the watchdog's own exit code if it failed
    pub fn exit_code(&self) -> i32 {
        let os_error = match self {
            Self::Channel(err) | Self::Fork(err) | Self::Signal(err) | Self::Io(err) => {
                err.raw_os_error()
            }
            Self::Handler(fault_capture::Error::Io(err)) => err.raw_os_error(),
            Self::Handler(fault_capture::Error::HandlerAlreadyInstalled) => None,
            Self::WatchdogFailed(code) => Some(*code),
        };

        os_error.filter(|code| *code != 0).unwrap_or(1)
    }
}

/// A report that could not be received in full
#[derive(thiserror::Error, Debug)]
pub enum ReceptionError {
    #[error("signal information incomplete, received {received} of {} bytes", ReportHeader::SIZE)]
    IncompleteHeader {
        received: usize,
        /// The header bytes, only the first `received` of which are valid
        header: [u8; ReportHeader::SIZE],
        #[source]
        source: Option<io::Error>,
    },
    #[error(
        "signal information corrupt, {} frames exceeds the maximum of {}",
        .header.frames,
        MAX_FRAMES
    )]
    InvalidFrameCount { header: ReportHeader },
    #[error(
        "stack trace incomplete, received {} of {} frames",
        .report.received_frames(),
        .report.header.frames
    )]
    IncompleteStack {
        /// The report, including the part of the stack that was received
        report: FaultReport,
        #[source]
        source: Option<io::Error>,
    },
}

impl ReceptionError {
    #[inline]
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::IncompleteHeader { .. } | Self::InvalidFrameCount { .. } => {
                ExitStatus::IncompleteHeader
            }
            Self::IncompleteStack { .. } => ExitStatus::IncompleteStack,
        }
    }

    /// The part of the header that was received before the failure, if any
    pub fn partial_header(&self) -> Option<PartialHeader<'_>> {
        match self {
            Self::IncompleteHeader {
                received, header, ..
            } if *received > 0 => Some(PartialHeader::new(&header[..*received])),
            Self::InvalidFrameCount { header } => Some(PartialHeader::new(header.as_bytes())),
            _ => None,
        }
    }
}
