//! Shared domain models and runtime configuration.
//!
//! Everything that crosses a component boundary (task records, results, the
//! queue envelope, cache snapshots, config) lives here so the queue, store,
//! cache and engine modules agree on one versioned schema.

pub mod model;
