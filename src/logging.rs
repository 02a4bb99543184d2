//! Log output setup.
//!
//! All modules log through `tracing` with `source`, `station` and `hour`
//! fields. This installs the fmt subscriber once per process: `RUST_LOG`
//! wins when set, otherwise `info` (or `debug` with `--verbose`) for this
//! crate and `warn` for dependencies.

use tracing_subscriber::EnvFilter;

fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("warn,marinemon_service={},marinemon={}", level, level)
}

pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
