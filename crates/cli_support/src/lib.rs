pub mod common;

pub use common::{prepare_output_dir, DirState, OutputDirArgs, OutputDirError, OverwritePolicy};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides `default_directive`.
pub fn init_logging(default_directive: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
