use kernel::config;
use kernel::logger::ConsoleLogger;
use log::{error, info, warn};
use std::process::ExitCode;

fn main() -> ExitCode {
    let config = match config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("kernel: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = ConsoleLogger::new(config.log_level).init() {
        eprintln!("kernel: {e}");
    }

    let mut command: Vec<String> = std::env::args().skip(1).collect();
    if command.is_empty() {
        command.push(String::from("/bin/init"));
    }

    let kernel = kernel::boot(&config, kernel::demo::programs());
    let free_at_boot = kernel.vm().frames().stats().free;

    if let Err(e) = kernel::spawn(&kernel, &command[0], command.as_slice()) {
        error!("runprogram {}: {e}", command[0]);
        return ExitCode::FAILURE;
    }
    kernel.threads().join_all();

    let stats = kernel.vm().frames().stats();
    let processes = kernel.processes().len();
    info!(
        "shutdown: {processes} processes left, {} of {} frames free",
        stats.free, stats.managed
    );
    if processes > 0 || stats.free != free_at_boot {
        warn!("shutdown: {} frames leaked", free_at_boot.saturating_sub(stats.free));
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
