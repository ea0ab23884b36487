use std::io;

use tracing_subscriber::EnvFilter;

/// Routes logs to stderr so stdout stays reserved for command output.
pub fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .init();
}

// Verbose mode only raises our own crate; reqwest and hyper stay at info.
fn default_directives(verbose: bool) -> &'static str {
    if verbose { "info,askgate=debug" } else { "info" }
}
