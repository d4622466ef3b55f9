//! HTTP/JSON transport for the call engine
//!
//! Exposes health, method discovery and the `/rpc/{service}/{method}` call endpoint.

pub mod handlers;
