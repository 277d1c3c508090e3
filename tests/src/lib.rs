//! # xCall Flow Test Suite
//!
//! Cross-chain flows over the simulated network from
//! `xcall_correlation::testkit`. Every flow runs the production adapters,
//! codecs and correlation strategies; only the ledgers are simulated.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs      # Network builder, signer, shorthand
//! └── flows/
//!     ├── delivery.rs  # Send + CallMessage correlation per family pair
//!     ├── rollback.rs  # Execution, response and rollback settlement
//!     ├── flush.rs     # Paused destination, flush and timeouts
//!     └── failures.rs  # Size limits, decode failures, serial numbers
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All flows
//! cargo test -p xcall-tests
//!
//! # By category
//! cargo test -p xcall-tests flows::rollback::
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod flows;
