#![deny(missing_docs)]
#![deny(clippy::all)]
//! In-memory peer RPC used to wire an election cluster together.
//!
//! A [`Network`] routes JSON-framed request/reply messages between named
//! mailboxes. The [`service!`] macro turns a service definition into a
//! typed `Client`/`Server`/`Service` triple. Every client call is bounded
//! by a timeout, and the router can drop traffic to simulate partitions
//! and lossy links.

/// Client-side constructor seam and the default call timeout.
pub mod client;
mod macros;
/// The message router and its fault injection knobs.
pub mod network;
/// Server-side dispatch loop.
pub mod server;

pub use anyhow;
pub use async_trait::async_trait;
pub use futures;
pub use log;
pub use rand;
pub use serde;
pub use serde_json;
pub use tokio;

pub use network::Network;
