//! services/api/src/lib.rs
//!
//! Library half of the `api` service: adapters, configuration, errors and the
//! HTTP/WebSocket surface. The binary in `bin/api.rs` wires them together.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
