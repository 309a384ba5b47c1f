//! SQLite implementations of storage interfaces.

mod log_store;

pub use log_store::SqliteLogStore;
