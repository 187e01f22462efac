//! Logging init (C10): structured logging to stdout.
//!
//! Grounded on the teacher's `ddm-core::logging::init_logging` (same
//! `tracing_subscriber::fmt` + `EnvFilter` shape), but writing to stdout
//! instead of an XDG state-dir file: the daemon is supervised by systemd or
//! a container runtime, both of which capture stdout, rather than run as an
//! interactive desktop CLI tool.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,provisioner=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}
