//! Per-service request handlers.

pub mod bz2;
