//! HTTP API: server wiring, routing, and request/response mapping over the
//! inventory ledger.

pub mod app;
pub mod context;
pub mod middleware;
