use polling::{Event, Events, Poller};
use std::{
    fs::File,
    io::{self, ErrorKind, Read},
    os::fd::{FromRawFd, OwnedFd},
    time::Duration,
};

/// How long the reader blocks before checking if the writer is still alive
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A one-way pipe from the monitored process to the watchdog
pub struct Channel {
    read: OwnedFd,
    write: OwnedFd,
}

impl Channel {
    /// Creates the pipe. Both ends are close-on-exec so that they don't leak
    /// into any programs either process runs.
    #[allow(unsafe_code)]
    pub fn create() -> io::Result<Self> {
        let mut fds = [-1; 2];

        // SAFETY: syscall, on success both descriptors are new and ours
        unsafe {
            if libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            })
        }
    }

    /// Splits the channel into its ends, each process keeps one and drops the
    /// other
    #[inline]
    pub fn split(self) -> (ReadEnd, WriteEnd) {
        (ReadEnd(self.read), WriteEnd(self.write))
    }
}

/// The end of the [`Channel`] the watchdog reads reports from
pub struct ReadEnd(OwnedFd);

impl ReadEnd {
    /// Creates a reader that waits for data, giving up once the channel is
    /// drained and `counterpart_gone` reports that the writer has exited.
    pub fn into_reader(self, counterpart_gone: fn() -> bool) -> io::Result<PipeReader> {
        PipeReader::new(File::from(self.0), counterpart_gone)
    }
}

/// The end of the [`Channel`] the fault handler writes reports to
pub struct WriteEnd(OwnedFd);

impl From<WriteEnd> for OwnedFd {
    fn from(end: WriteEnd) -> Self {
        end.0
    }
}

/// Reads from the read end of the channel.
///
/// A pipe only reaches the end of the stream once every write end is closed,
/// which doesn't happen if a copy of the write end outlives the monitored
/// process, eg. in a grandchild it spawned. So rather than blocking
/// indefinitely the reader waits in short intervals, and ends the stream when
/// there is nothing left to read and the counterpart process has exited.
pub struct PipeReader {
    pipe: File,
    poll: Poller,
    events: Events,
    counterpart_gone: fn() -> bool,
}

impl PipeReader {
    const KEY: usize = 0;

    #[allow(unsafe_code)]
    fn new(pipe: File, counterpart_gone: fn() -> bool) -> io::Result<Self> {
        set_nonblocking(&pipe)?;

        let poll = Poller::new()?;

        // SAFETY: We ensure we delete the pipe during drop
        unsafe {
            poll.add(&pipe, Event::readable(Self::KEY))?;
        }

        Ok(Self {
            pipe,
            poll,
            events: Events::new(),
            counterpart_gone,
        })
    }

    /// Waits until the pipe is readable, or the poll interval elapses
    fn wait(&mut self) -> io::Result<()> {
        self.events.clear();
        self.poll.wait(&mut self.events, Some(POLL_INTERVAL))?;

        // We need to reregister interest every time
        self.poll.modify(&self.pipe, Event::readable(Self::KEY))
    }
}

impl Read for PipeReader {
    /// Interrupted waits are returned as [`ErrorKind::Interrupted`] so that the
    /// caller decides whether to retry
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match (&self.pipe).read(buf) {
                Ok(read) => return Ok(read),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if (self.counterpart_gone)() {
                        log::debug!("channel drained and the monitored process is gone");
                        return Ok(0);
                    }

                    self.wait()?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        if let Err(err) = self.poll.delete(&self.pipe) {
            log::error!("failed to deregister pipe: {err}");
        }
    }
}

#[allow(unsafe_code)]
fn set_nonblocking(pipe: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: syscalls
    unsafe {
        let flags = libc::fcntl(pipe.as_raw_fd(), libc::F_GETFL);
        if flags == -1 || libc::fcntl(pipe.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    fn never() -> bool {
        false
    }

    fn always() -> bool {
        true
    }

    #[test]
    fn reads_until_writer_closes() {
        let (read, write) = Channel::create().unwrap().split();
        let mut reader = read.into_reader(never).unwrap();

        let writer = std::thread::spawn(move || {
            let mut file = File::from(OwnedFd::from(write));
            for chunk in [&b"first "[..], b"second"] {
                std::thread::sleep(Duration::from_millis(25));
                file.write_all(chunk).unwrap();
            }
        });

        let mut received = Vec::new();
        loop {
            match reader.read_to_end(&mut received) {
                Ok(_) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => panic!("failed to read: {err}"),
            }
        }

        writer.join().unwrap();
        assert_eq!(received, b"first second");
    }

    #[test]
    fn drains_before_ending_when_counterpart_is_gone() {
        let (read, write) = Channel::create().unwrap().split();
        let mut file = File::from(OwnedFd::from(write));
        file.write_all(b"pending").unwrap();

        // The write end stays open, but the reader is told its writer is gone
        let mut reader = read.into_reader(always).unwrap();
        let mut received = Vec::new();
        reader.read_to_end(&mut received).unwrap();

        assert_eq!(received, b"pending");
        drop(file);
    }
}
