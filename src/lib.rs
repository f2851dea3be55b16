//! Kernel scheduling/memory telemetry aggregation core.
//!
//! Producers (kernel-event callbacks) write into a lock-free, fixed-capacity
//! [`store::MetricStore`] keyed by [`registry::MetricId`]; a separate
//! consumer path takes immutable snapshots and exports them. The
//! [`agent::Agent`] owns the store across one collection session.

pub mod agent;
pub mod config;
pub mod export;
pub mod producer;
pub mod registry;
pub mod store;
