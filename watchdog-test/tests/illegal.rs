use watchdog_test::*;

#[test]
fn illegal_instruction() {
    let output = run_client(Fault::Illegal, 0);

    assert_termination(&output, Termination::Exit(128 + libc::SIGILL));
    assert_single_report(&output, Fault::Illegal);
}
