//! ELM327 edge agent: library side, so integration tests can drive the
//! same code paths as the binary.

pub mod config;
pub mod runner;
