//! Connector Module
//!
//! Reliable message queues and RPC layered on store lists.
//!
//! ## Envelope Flow
//! ```text
//!  sender                        store                         receiver
//!  ──────                        ─────                         ────────
//!  serialize + sign ──LPUSH──▶  [dst list]  ──(B)RPOPLPUSH──▶ staging list
//!                                                               │ verify
//!                                                               │ deserialize
//!                               [src list]  ◀──MULTI/EXEC───── reply + release
//! ```
//!
//! In safe mode the receiver's copy stays in its staging list until it is
//! released, so a crash between receive and reply loses nothing.

mod envelope;
mod queue;
mod rpc;
mod serializer;
pub mod signing;

pub use envelope::{unwrap_value, Envelope};
pub use queue::{Connector, ConnectorBuilder, Incoming, SendOptions, Wait};
pub use rpc::{CallArgs, Handler, HandlerResult, Proxy};
pub use serializer::{JsonSerializer, PrettyJsonSerializer, Serializer};
