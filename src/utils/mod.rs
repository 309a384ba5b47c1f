//! Shared helpers for the logpipe binaries.

pub mod bootstrap;
