//! Stream recorder core: watches a live stream's metadata, decides which
//! completed tracks to keep, writes them to disk and reconnects on
//! transient failures.

pub mod connection;
pub mod core;
pub mod error;
pub mod filters;
pub mod intent;
pub mod notify;
pub mod persist;
pub mod socket;
pub mod stream;
