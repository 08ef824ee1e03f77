//! HTTP API: server wiring, caller identity, routing and error mapping.

pub mod app;
pub mod context;
pub mod middleware;
