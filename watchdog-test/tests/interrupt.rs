use watchdog_test::*;

#[test]
fn interrupt_simple() {
    let output = run_client(Fault::Interrupt, 0);

    assert_termination(&output, Termination::Exit(128 + libc::SIGINT));

    let report = assert_single_report(&output, Fault::Interrupt);
    assert_eq!(report.address, 0);
}
