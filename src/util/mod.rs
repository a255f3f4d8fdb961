use std::path::Path;

use nix::unistd::{access, AccessFlags};

pub mod config;
pub mod env;

/// Whether the current user may write to `path`.
pub fn is_writable(path: &Path) -> bool {
    access(path, AccessFlags::W_OK).is_ok()
}

/// Drop a Debian epoch (`1:2.0-1` -> `2.0-1`). Epochs never appear in
/// package file names.
pub fn strip_epoch(version: &str) -> &str {
    match version.split_once(':') {
        Some((_, rest)) => rest,
        None => version,
    }
}

#[cfg(test)]
#[allow(unused_must_use)]
pub fn test_init() {
    std::env::set_var("RUST_BACKTRACE", "full");
    std::panic::catch_unwind(|| {
        color_eyre::install();
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}
