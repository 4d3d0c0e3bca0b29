//! Test harness for the Confab client.
//!
//! Provides [`MockServer`], an in-process chat server speaking enough of the
//! REST surface and the WebSocket frame protocol to drive integration tests:
//! login with cookie issuance, the authentication handshake, ping→pong,
//! message acknowledgements, scripted pushes, and fixture-backed people and
//! room listings.
//!
//! Tests are expected to drive the server explicitly: seed fixtures through
//! [`MockServerBuilder`], push frames with [`MockServer::push`], and inspect
//! what the client sent via [`MockServer::received`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod fixtures;
mod mock_server;

pub use mock_server::{MockServer, MockServerBuilder};
