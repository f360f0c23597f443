use watchdog_test::*;

#[test]
fn bus_error_simple() {
    let output = run_client(Fault::Bus, 0);

    assert_termination(&output, Termination::Exit(128 + libc::SIGBUS));

    let report = assert_single_report(&output, Fault::Bus);
    // BUS_ADRERR, at the start of the mapping
    assert_eq!(report.code, 2);
    assert_ne!(report.address, 0);
    assert_eq!(report.address % 4096, 0);
}
