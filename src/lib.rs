//! `httpstub` is an embeddable mock HTTP server for tests. It binds a local TCP port, speaks a
//! practical subset of HTTP/1.1 and lets a test script which responses come back for which
//! requests, in what order and with what timing. Every request it sees is recorded so the test
//! can make assertions about it afterwards.
//!
//! # Getting Started
//! ```rust
//! use httpstub::{Mock, MockServer};
//!
//! let server = MockServer::new();
//! server.start(0).expect("cannot start mock server");
//!
//! server.mock_response(Mock::new(200).endpoint("GET /hello").body("world"));
//!
//! // ... let the code under test call `server.url("/hello")` ...
//!
//! assert!(server.latest_request_endpoints().is_empty());
//! ```
//!
//! # Matching
//! Mock rules are evaluated in registration order and the first rule that accepts a request
//! answers it. A rule restricted with [`Mock::endpoint`] accepts requests with exactly that
//! method and path; [`Mock::matching`] accepts whatever the predicate accepts. A rule with
//! neither accepts every request. A rule registered with [`Mock::only_once`] answers a single
//! request and is skipped afterwards.
//!
//! If no rule accepts a request, the most recently registered rule without a matcher that has not
//! been used up answers it. If there is no such rule, the server sends an empty `200 OK`.
//!
//! # Connections
//! HTTP/1.1 connections are kept alive unless the client sends `Connection: close` or the
//! response uses a streaming body ([`Mock::streaming_body`]). Request bodies may be sent with
//! `Content-Length` or chunked transfer encoding. A request that cannot be decoded ends its
//! connection without a response; other connections are not affected.
//!
//! # Debugging
//! `httpstub` logs through `tracing`, which forwards to the `log` crate when no subscriber is
//! installed. With `env_logger` as logging backend, set `RUST_LOG=httpstub=trace` and call
//! `env_logger::try_init()` in the test:
//! ```rust
//! #[test]
//! fn your_test() {
//!     let _ = env_logger::try_init();
//!     // ...
//! }
//! ```
//!
//! # Configuration
//! [`MockServer::new`] reads its [`ServerConfig`] from the environment:
//! `HTTPSTUB_WORKER_THREADS`, `HTTPSTUB_BLOCKING_THREADS` and `HTTPSTUB_HISTORY_LIMIT`.

mod api;
mod common;
mod server;

pub use api::{Mock, MockRef, MockServer};
pub use common::data::{Body, Request, Response};
pub use server::{Error, Matcher, ServerConfig};
