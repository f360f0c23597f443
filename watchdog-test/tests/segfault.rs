use watchdog_test::*;

fn assert_segfault(threads: usize) {
    let output = run_client(Fault::Segv, threads);

    // Re-raised with the original action, so that a core can be dumped
    assert_termination(&output, Termination::Signal(libc::SIGSEGV));

    let report = assert_single_report(&output, Fault::Segv);
    assert_eq!(report.address, sadness::SEGFAULT_ADDRESS);
    // SEGV_MAPERR
    assert_eq!(report.code, 1);
}

#[test]
fn segfault_simple() {
    assert_segfault(0);
}

#[test]
fn segfault_threaded() {
    assert_segfault(1);
}
