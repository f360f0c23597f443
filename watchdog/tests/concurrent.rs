//! Captures racing on several threads must arrive as whole, separate reports

use fault_capture::{Classification, FaultHandler, Signal};
use std::sync::Barrier;
use watchdog::{Channel, FaultReport, ReportReader};

fn never() -> bool {
    false
}

fn capture_concurrently(threads: usize) -> Vec<FaultReport> {
    let (read, write) = Channel::create().unwrap().split();

    let reader = std::thread::spawn(move || {
        let mut reader = ReportReader::new(read.into_reader(never).unwrap());
        let mut reports = Vec::new();
        while let Some(report) = reader.next_report().unwrap() {
            reports.push(report);
        }
        reports
    });

    let handler = FaultHandler::attach(write.into()).unwrap();
    let start = Barrier::new(threads);

    std::thread::scope(|s| {
        for i in 0..threads {
            let handler = &handler;
            let start = &start;

            s.spawn(move || {
                start.wait();
                assert_eq!(
                    handler.simulate_signal(Signal::Segv, 0x1000 * (i + 1)),
                    Classification::CoreDump
                );
            });
        }
    });

    // Closes the only write end, ending the stream
    handler.detach();

    reader.join().unwrap()
}

#[test]
fn reports_are_never_interleaved() {
    for threads in 1..=8 {
        let reports = capture_concurrently(threads);
        assert_eq!(reports.len(), threads);

        let mut addresses: Vec<_> = reports
            .iter()
            .map(|report| {
                assert_eq!(report.header.signo, libc::SIGSEGV);
                assert_eq!(report.header.code, 0);
                assert!(report.header.frames > 0);
                assert_eq!(report.received_frames(), report.header.frames as usize);

                // backtrace_symbols_fd lines always end with the return address
                for frame in report.frames() {
                    assert!(frame.ends_with(']'), "unexpected frame {frame:?}");
                }

                report.header.address
            })
            .collect();

        addresses.sort_unstable();
        let expected: Vec<_> = (1..=threads).map(|i| 0x1000 * i).collect();
        assert_eq!(addresses, expected);
    }
}
