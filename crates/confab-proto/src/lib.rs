//! Wire protocol for the Confab chat service.
//!
//! This crate owns the wire representation shared by the client and the test
//! harness. It intentionally keeps frame contents flexible (`serde_json::Value`)
//! while the envelope itself is strongly typed.
//!
//! # Components
//!
//! - [`Frame`]: the JSON envelope carried over the WebSocket
//! - [`NonceSequence`]: per-session monotonic counter correlating
//!   request/response frames
//! - [`FrameFilter`]: match predicate over inbound frames (name, nonce,
//!   contents subset, wildcard)
//! - [`name`]: the known frame names

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod filter;
mod frame;
pub mod name;

pub use filter::{is_subset, FilterError, FrameFilter, FrameMatch};
pub use frame::{CodecError, Frame, FrameSource, NonceSequence, SOURCE_NAME};
