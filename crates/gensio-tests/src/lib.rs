//! gensio scenario suites
//!
//! Certificate fixtures, an accept/connect scenario runner, and suites that
//! drive complete stacks end to end: echo loopback, small-chunk mux over
//! stream transports, TLS client authentication, and property tests over
//! the descriptor parser and the framing stages.

pub mod echo_scenarios;
pub mod harness;
pub mod mux_scenarios;
pub mod proptest_descriptor;
pub mod ssl_scenarios;

pub use harness::{
    accept_connect, assert_auth_rejected, CertFixture, HarnessError, Scenario, TEST_STRING,
};

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static TRACING: Once = Once::new();

/// Installs a test-friendly subscriber once per process.
///
/// Filtering follows `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .try_init();
    });
}
