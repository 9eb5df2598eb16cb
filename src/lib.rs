//! # Courier
//!
//! A client for a remote key-value store node with:
//! - The length-prefixed request/reply wire protocol
//! - A command facade tracking transaction and subscription state
//! - Reliable, optionally signed message queues on store lists
//! - Request/response RPC with a worker loop and call proxies
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Connector (queues + RPC)                      │
//! │        Envelope · Serializer · Signing · Worker/Proxy        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                  Client (command facade)                     │
//! │      session flags · safe retry · subscriptions              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Connection  │          │  Protocol   │
//!   │   (TCP)     │─────────▶│   (codec)   │
//!   └─────────────┘          └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use courier::{Client, Config, Connector};
//! use serde_json::json;
//!
//! # fn main() -> courier::Result<()> {
//! let client = Client::new(Config::default());
//! let mut connector = Connector::builder().name("jobs").safe(true).build(client);
//!
//! connector.send("jobs", json!({"task": "resize"}))?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod client;
pub mod pubsub;
pub mod structures;
pub mod connector;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CourierError, Result};
pub use config::Config;
pub use client::Client;
pub use protocol::{Catalogue, Command, Reply};
pub use pubsub::{Message, Subscriber, Subscription};
pub use structures::{Counter, HashKey, StringKey};
pub use connector::{CallArgs, Connector, Envelope, Proxy, SendOptions, Wait};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Courier
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
