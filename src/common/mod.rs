//! Scenario configuration and result artifacts shared by the binary and tests.

pub mod config;
pub mod report;
