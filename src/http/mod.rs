//! HTTP protocol implementation.
//!
//! A small HTTP/1.0 and HTTP/1.1 server core driven by readiness events.
//! Every connection serves exactly one request and is then closed.
//!
//! # Architecture
//!
//! - **`connection`**: The per-socket state machine the event loop drives
//! - **`parser`**: Incremental request parsing from byte buffers
//! - **`request`**: Request, method, version and header types
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Non-blocking response serialization and file streaming
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌────────────────┐
//!        │ ReadingHeaders │ ← Buffer input until the blank line
//!        └───────┬────────┘
//!                │ Head parsed ──── Content-Length > 0 ───┐
//!                │                                        ▼
//!                │                               ┌─────────────┐
//!                │                               │ ReadingBody │
//!                │                               └──────┬──────┘
//!                ▼                                      │ Body complete
//!        ┌────────────────┐◄────────────────────────────┘
//!        │  Dispatching   │ ← Resolve path, build response
//!        └───────┬────────┘
//!                ▼
//!        ┌─────────────────┐
//!        │ WritingResponse │ ← Flush head and body while writable
//!        └───────┬─────────┘
//!                ▼
//!        ┌────────────────┐
//!        │    Closing     │
//!        └────────────────┘
//! ```
//!
//! Parse errors skip straight to `WritingResponse` with a 4xx response.

pub mod connection;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
