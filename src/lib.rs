//! logpipe - severity-routed log event pipeline
//!
//! Producers publish log events onto a durable topic exchange; listeners
//! bind an exclusive queue under routing-key patterns and hand every decoded
//! record to a [`storage::LogStore`].

pub mod bus;
pub mod config;
pub mod storage;
pub mod utils;
