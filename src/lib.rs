//! Beacon - event-driven static file server
//!
//! Core library for HTTP handling, file serving and the worker processes.

pub mod config;
pub mod files;
pub mod http;
pub mod logging;
pub mod server;
