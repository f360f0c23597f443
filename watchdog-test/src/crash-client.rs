use watchdog_test::{Fault, sadness};

use clap::Parser;

#[derive(Parser)]
struct Command {
    /// The fault to raise
    #[clap(long)]
    fault: Fault,
    /// Raises the fault on this many threads rather than the main thread
    #[clap(long, default_value_t = 0)]
    threads: usize,
    /// Limits the size of core dumps, in bytes
    #[clap(long)]
    max_core_size: Option<u64>,
}

fn raise(fault: Fault) {
    match fault {
        Fault::Abort => sadness::raise_abort(),
        Fault::Bus => sadness::raise_bus_error(),
        Fault::Fpe => sadness::raise_floating_point_exception(),
        Fault::Illegal => sadness::raise_illegal_instruction(),
        Fault::Segv => sadness::raise_segfault(),
        Fault::Trap => sadness::raise_trap(),
        Fault::Hangup | Fault::Interrupt | Fault::Quit | Fault::Term => {
            sadness::raise(fault.signo());
        }
    }
}

#[allow(unsafe_code)]
fn real_main() -> anyhow::Result<()> {
    let cmd = Command::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let config = watchdog::Config {
        max_core_size: cmd
            .max_core_size
            .map_or(watchdog::CoreSize::Unlimited, watchdog::CoreSize::Bytes),
    };

    // SAFETY: no other threads have been spawned yet
    let monitor = unsafe { watchdog::start(&config)? };

    log::info!(
        "raising {} on {} threads",
        cmd.fault,
        cmd.threads.max(1)
    );

    let fault = cmd.fault;

    if cmd.threads == 0 {
        raise(fault);
    } else {
        let threads: Vec<_> = (0..cmd.threads)
            .map(|_| std::thread::spawn(move || raise(fault)))
            .collect();

        for thread in threads {
            thread
                .join()
                .map_err(|_err| anyhow::anyhow!("fault thread panicked"))?;
        }
    }

    // Only a termination request lets us get this far
    anyhow::ensure!(
        fault_capture::termination_requested(),
        "we should have raised {fault} and exited"
    );

    monitor.shutdown()?;
    Ok(())
}

fn main() {
    // Faults are meant to terminate us via their signal, so emit an error code
    // if something else went wrong so that we can fail the test
    if let Err(e) = real_main() {
        eprintln!("error: {e:#}");

        let code = e
            .downcast_ref::<watchdog::Error>()
            .map_or(222, watchdog::Error::exit_code);

        #[allow(clippy::exit)]
        std::process::exit(code);
    }
}
