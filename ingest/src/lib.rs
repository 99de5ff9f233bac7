//! Correlation, sampling, and batching engine for API gateway events.
//!
//! Raw stream events carry one half of an HTTP transaction each; the two
//! halves of a transaction arrive independently and possibly out of order.
//! This crate matches them by correlation id, applies the remotely
//! configured sampling policy, and delivers the survivors to the analytics
//! collector in batches.

pub mod batch;
pub mod collector;
pub mod errors;
pub mod message;
pub mod metrics_defs;
pub mod processor;
pub mod store;
pub mod stream;
