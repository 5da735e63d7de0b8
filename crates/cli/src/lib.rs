//! Library half of the `fwatch` binary
//!
//! Holds the configuration model so it can be tested without spawning the
//! binary.

pub mod config;
