pub mod sadness;

use std::{fmt, process::Output};

/// The fault the crash-client inflicts on itself
#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum Fault {
    Abort,
    Bus,
    Fpe,
    Hangup,
    Illegal,
    Interrupt,
    Quit,
    Segv,
    Term,
    Trap,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Abort => "abort",
            Self::Bus => "bus",
            Self::Fpe => "fpe",
            Self::Hangup => "hangup",
            Self::Illegal => "illegal",
            Self::Interrupt => "interrupt",
            Self::Quit => "quit",
            Self::Segv => "segv",
            Self::Term => "term",
            Self::Trap => "trap",
        })
    }
}

impl Fault {
    /// The signal the fault raises
    pub fn signo(self) -> i32 {
        match self {
            Self::Abort => libc::SIGABRT,
            Self::Bus => libc::SIGBUS,
            Self::Fpe => libc::SIGFPE,
            Self::Hangup => libc::SIGHUP,
            Self::Illegal => libc::SIGILL,
            Self::Interrupt => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Segv => libc::SIGSEGV,
            Self::Term => libc::SIGTERM,
            Self::Trap => libc::SIGTRAP,
        }
    }
}

/// A report as printed by the watchdog
#[derive(Debug)]
pub struct Report {
    pub signal: String,
    pub code: i32,
    pub address: usize,
    pub frames: Vec<String>,
}

#[inline]
pub fn capture_output() {
    static SUB: std::sync::Once = std::sync::Once::new();

    SUB.call_once(|| {
        tracing_subscriber::fmt().with_test_writer().init();
    });
}

/// Runs the crash-client, raising `fault` on each of `threads` threads, or
/// the main thread if 0
pub fn run_client(fault: Fault, threads: usize) -> Output {
    use std::env;

    capture_output();

    // Adapted from
    // https://github.com/rust-lang/cargo/blob/485670b3983b52289a2f353d589c57fae2f60f82/tests/testsuite/support/mod.rs#L507
    let mut cmd_path = env::current_exe().expect("failed to get exe path");
    cmd_path.pop();
    if cmd_path.ends_with("deps") {
        cmd_path.pop();
    }

    cmd_path.push("crash-client");

    let mut cmd = std::process::Command::new(&cmd_path);
    cmd.stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    cmd.args(["--fault", &fault.to_string(), "--max-core-size", "0"]);
    if threads > 0 {
        cmd.args(["--threads", &threads.to_string()]);
    }

    let child = cmd.spawn().expect("failed to run crash-client");
    // Waits until the watchdog has closed its copy of stdout as well
    let output = child.wait_with_output().expect("failed to wait for output");

    let stdout = std::str::from_utf8(&output.stdout).expect("invalid stdout");
    let stderr = std::str::from_utf8(&output.stderr).expect("invalid stderr");

    println!("{stdout}");
    eprintln!("{stderr}");

    output
}

/// How the monitored process is expected to have ended
#[derive(Copy, Clone, Debug)]
pub enum Termination {
    Exit(i32),
    Signal(i32),
}

/// Asserts how the crash-client terminated.
///
/// When the watchdog is the parent, the crash-client's own process is the
/// watchdog, so only its clean exit can be checked.
pub fn assert_termination(output: &Output, expected: Termination) {
    use std::os::unix::process::ExitStatusExt;

    let status = output.status;

    if watchdog::WATCHDOG_IS_PARENT {
        assert_eq!(status.code(), Some(0), "watchdog exited with {status}");
        return;
    }

    match expected {
        Termination::Exit(code) => assert_eq!(status.code(), Some(code), "{status}"),
        Termination::Signal(signo) => assert_eq!(status.signal(), Some(signo), "{status}"),
    }
}

/// Parses every report the watchdog wrote to stdout
pub fn parse_reports(output: &Output) -> Vec<Report> {
    let stdout = std::str::from_utf8(&output.stdout).expect("invalid stdout");
    let mut lines = stdout.lines();
    let mut reports = Vec::new();

    while let Some(line) = lines.next() {
        let Some(summary) = line.strip_prefix("[Watchdog] Monitored process received signal ")
        else {
            continue;
        };

        let (signal, rest) = summary.split_once(' ').expect("missing signal name");

        let code = rest
            .split_once(", code ")
            .and_then(|(_, code)| code.split([' ', ',']).next())
            .expect("missing code")
            .parse()
            .expect("invalid code");

        let address = rest
            .rsplit_once(", address 0x")
            .map(|(_, address)| usize::from_str_radix(address, 16).expect("invalid address"))
            .expect("missing address");

        let count: usize = lines
            .next()
            .and_then(|line| line.strip_prefix("[Watchdog] Stack trace ("))
            .and_then(|line| line.strip_suffix(" frames):"))
            .expect("missing stack trace")
            .parse()
            .expect("invalid frame count");

        let frames: Vec<_> = lines.by_ref().take(count).map(String::from).collect();
        assert_eq!(frames.len(), count, "stack trace was cut short");

        reports.push(Report {
            signal: signal.to_owned(),
            code,
            address,
            frames,
        });
    }

    reports
}

/// Asserts that a single, complete report for `fault` was printed and
/// returns it
pub fn assert_single_report(output: &Output, fault: Fault) -> Report {
    let stdout = std::str::from_utf8(&output.stdout).expect("invalid stdout");
    assert!(!stdout.contains("incomplete"), "incomplete report");

    let mut reports = parse_reports(output);
    assert_eq!(reports.len(), 1, "expected a single report");

    let report = reports.remove(0);
    assert_eq!(Some(report.signal.as_str()), fault_report::signal_name(fault.signo()));
    assert!(!report.frames.is_empty());

    report
}
