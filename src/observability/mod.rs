//! Observability for pulsemux
//!
//! Structured one-line JSON logging used by the multiplexer for channel
//! lifecycle, open failures, listener panics, and periodic stats.
//!
//! # Principles
//!
//! 1. Logging is read-only and never affects delivery
//! 2. Synchronous writes, no buffering
//! 3. Deterministic field ordering
//! 4. Logging failure must never crash the host application

mod logger;

pub use logger::{Logger, Severity};
