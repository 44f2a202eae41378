//! Integration tests for linkwatch
//!
//! Organized by subsystem; shared fixtures live in `common`.

mod common;

mod store_tests;
mod watch_tests;
