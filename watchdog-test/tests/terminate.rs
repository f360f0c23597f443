use watchdog_test::*;

#[test]
fn terminate_threaded() {
    for threads in [1, 4, 8] {
        let output = run_client(Fault::Term, threads);

        // Termination requests are only reported, the process shuts down on
        // its own terms, and fails its shutdown unless the watchdog exited 0
        assert_termination(&output, Termination::Exit(0));

        let stdout = std::str::from_utf8(&output.stdout).unwrap();
        assert!(!stdout.contains("incomplete"));

        let reports = parse_reports(&output);
        assert_eq!(reports.len(), threads);

        for report in reports {
            assert_eq!(report.signal, "SIGTERM");
            // SI_TKILL
            assert_eq!(report.code, -6);
            assert_eq!(report.address, 0);
            assert!(!report.frames.is_empty());
        }
    }
}
