//! Asynchronous client for the Confab team-chat protocol.
//!
//! A [`Session`] is a long-lived, authenticated, bidirectional connection to
//! a chat server: HTTP login and bootstrapping, a persistent WebSocket
//! running a nonced frame protocol with heartbeats and reconnection, and a
//! live in-memory model of people, rooms, and messages kept coherent with
//! both server pushes and REST queries.
//!
//! # Layers
//!
//! - [`http::HttpTransport`]: REST calls with cookie auth and bracket-keyed
//!   queries
//! - [`socket::SocketSession`]: WebSocket handshake, frame waiters,
//!   heartbeat state machine
//! - [`wire::WireClient`]: every domain RPC over the two transports
//! - [`cache::Roster`]: the entity cache and frame router
//! - [`Session`]: lifecycle, lookups, events, reconnection
//!
//! # Example
//!
//! ```no_run
//! use confab_client::{Credentials, Installation, Session, SessionConfig};
//!
//! # async fn run() -> Result<(), confab_client::ClientError> {
//! let installation = Installation::new("https://digitalcrew.teamwork.com")?;
//! let config = SessionConfig::new(
//!     installation,
//!     Credentials::Login { username: "adrianc".into(), password: "…".into() },
//! );
//! let session = Session::new(config);
//! session.connect().await?;
//!
//! let peter = session.get_person_by_handle("peter").await?;
//! session.send_message_to_person(&peter, "howya lad").await?;
//!
//! let mut events = session.events();
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.kind());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cache;
pub mod dto;
mod error;
pub mod event;
pub mod http;
mod installation;
pub mod model;
mod session;
pub mod socket;
pub mod wire;

pub use error::{ClientError, CloseReason, HttpError, SocketError};
pub use event::{EventBus, SessionEvent};
pub use installation::{Credentials, Installation, SessionConfig, API_KEY_PASSWORD};
pub use model::{Author, Message, MessageStatus, Person, PersonStatus, Room, RoomKind};
pub use session::{CurrentUser, Monitor, Session, RECONNECT_INTERVAL};
pub use socket::{SocketConfig, SocketState};
pub use wire::{PeopleQuery, RoomQuery, WireClient};

/// Re-export of the wire protocol crate.
pub use confab_proto as proto;
