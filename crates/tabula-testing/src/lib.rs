//! # tabula-testing
//!
//! Test infrastructure for the tabula crates.
//!
//! The main piece is [`MockServer`], an in-memory stand-in for a database
//! server. Backends created from it share the server's state, so a test can
//! hand a backend to a driver (or a factory to a pool) and still inspect
//! afterwards which sessions were opened, which options were applied and
//! which statements ran.
//!
//! ```rust,ignore
//! use tabula_driver::{ConnOption, DbDriver, OptionKind};
//! use tabula_testing::MockServer;
//!
//! let server = MockServer::new();
//! server.require_session(OptionKind::InitCommand);
//!
//! let mut driver = DbDriver::new(server.backend());
//! driver.set_option(ConnOption::InitCommand("SET NAMES utf8mb4".into()))?;
//! driver.connect(&Default::default());
//! assert_eq!(server.sessions()[0].applied.len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockBackend, MockServer, SessionLog};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
