//! Tracing initialisation shared by the binaries.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_DIRECTIVES: &str = "info,server=debug,services=debug,db=info,tower_http=info";

/// Installs the global subscriber. `RUST_LOG` overrides the default directives.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    // A second call (tests, embedded use) is a no-op.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// Exit code of a process brought down by a panic.
pub const PANIC_EXIT_CODE: i32 = 1;

/// Routes panics through tracing so they end up next to the request logs, then
/// terminates the process. Without the exit a panicking request handler would
/// only end its own connection task.
pub fn install_panic_hook() {
    set_panic_hook(|code| std::process::exit(code));
}

fn set_panic_hook<F>(exit: F)
where
    F: Fn(i32) + Send + Sync + 'static,
{
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(location = %location, "uncaught panic: {}", info);
        default_hook(info);
        exit(PANIC_EXIT_CODE);
    }));
}
