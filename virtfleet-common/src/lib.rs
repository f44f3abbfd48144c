//! # virtfleet Common
//!
//! Shared utilities for the virtfleet service components.
//!
//! ## Logging
//!
//! ```rust
//! use virtfleet_common::init_logging;
//!
//! init_logging("info").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json};
