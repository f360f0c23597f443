use crate::{
    Channel, CoreSize, Error, ExitStatus, ReadEnd, ReceptionError, Watchdog,
    topology::{self, Role},
};
use fault_capture::FaultHandler;
use fault_report::ReportHeader;

/// Runtime configuration for [`start`]
#[derive(Copy, Clone, Debug, Default)]
pub struct Config {
    /// The core dump size limit applied to the monitored process, so that
    /// signals which dump core actually produce one
    pub max_core_size: CoreSize,
}

/// Handle to the watchdog, held by the monitored process.
///
/// Dropping it has the same effect as [`Monitor::shutdown`], with errors
/// logged rather than returned.
pub struct Monitor {
    handler: Option<FaultHandler>,
    watchdog: libc::pid_t,
}

/// Splits off the watchdog process and attaches the fault handler in this one.
///
/// Only the monitored process returns from this function, the watchdog exits
/// with its [`ExitStatus`] once the monitored process has closed the channel,
/// or exited.
///
/// # Safety
///
/// This forks, so it should be called before any other threads are spawned,
/// as only the calling thread is duplicated into the new process.
///
/// # Errors
///
/// The channel could not be created, the process could not be forked, or
/// the fault handler could not be attached, see [`Error::exit_code`] for the
/// code to exit with.
#[allow(unsafe_code)]
pub unsafe fn start(config: &Config) -> Result<Monitor, Error> {
    let channel = Channel::create().map_err(Error::Channel)?;

    // SAFETY: syscalls
    let (parent, forked) = unsafe { (libc::getpid(), libc::fork()) };
    if forked == -1 {
        return Err(Error::Fork(std::io::Error::last_os_error()));
    }

    let (read, write) = channel.split();

    let watchdog = match topology::roles(forked, parent) {
        Role::Watchdog { monitored } => {
            drop(write);
            let status = run_watchdog(read, monitored);

            #[allow(clippy::exit)]
            std::process::exit(status.code());
        }
        Role::Monitored { watchdog } => watchdog,
    };

    // If the watchdog dies, our writes fail rather than block on a pipe that
    // nothing will ever drain
    drop(read);

    match fault_capture::set_max_core_size(config.max_core_size) {
        Ok(limit) => log::debug!("core dump size limited to {limit:?}"),
        Err(err) => log::error!("failed to set the core dump size limit: {err}"),
    }

    let handler = FaultHandler::attach(write.into())?;

    for signal in handler.failed_signals() {
        log::warn!("faults from {signal:?} will not be reported");
    }

    log::info!(
        "watchdog {watchdog} is monitoring process {}",
        std::process::id()
    );

    Ok(Monitor {
        handler: Some(handler),
        watchdog,
    })
}

fn run_watchdog(read: ReadEnd, monitored: libc::pid_t) -> ExitStatus {
    if let Err(err) = topology::arm(monitored) {
        log::error!("{err}, continuing without it");
    }

    let stdout = std::io::stdout();
    let mut watchdog = Watchdog::new(stdout.lock());

    match read.into_reader(topology::counterpart_gone) {
        Ok(channel) => watchdog.run(channel),
        Err(err) => watchdog.fail(&ReceptionError::IncompleteHeader {
            received: 0,
            header: [0; ReportHeader::SIZE],
            source: Some(err),
        }),
    }
}

impl Monitor {
    /// The pid of the watchdog process
    #[inline]
    pub fn watchdog_pid(&self) -> u32 {
        self.watchdog as u32
    }

    /// The attached fault handler, `None` once shut down
    #[inline]
    pub fn fault_handler(&self) -> Option<&FaultHandler> {
        self.handler.as_ref()
    }

    /// Detaches the fault handler, which closes the channel so that the
    /// watchdog exits, and then waits for the watchdog to exit if it is our
    /// child.
    ///
    /// # Errors
    ///
    /// Waiting for the watchdog failed, or it exited with a non-zero status
    /// as it failed to receive a report
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), Error> {
        let Some(handler) = self.handler.take() else {
            return Ok(());
        };

        handler.detach();

        match topology::reap(self.watchdog)? {
            Some(0) | None => {}
            Some(code) => return Err(Error::WatchdogFailed(code)),
        }

        log::debug!("watchdog {} shut down", self.watchdog);
        Ok(())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::error!("failed to shut down the watchdog: {err}");
        }
    }
}
