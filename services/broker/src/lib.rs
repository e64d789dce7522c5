//! Broker service library crate.
//!
//! # Purpose
//! Exposes the HTTP/WebSocket surface, configuration, and observability wiring
//! for use by the broker binary and integration tests.
pub mod api;
pub mod app;
pub mod config;
pub mod observability;
