use watchdog_test::*;

#[test]
fn quit_simple() {
    let output = run_client(Fault::Quit, 0);

    // Dumps core like a segfault does
    assert_termination(&output, Termination::Signal(libc::SIGQUIT));

    let report = assert_single_report(&output, Fault::Quit);
    // SI_TKILL
    assert_eq!(report.code, -6);
    assert_eq!(report.address, 0);
}
