//! Network Module
//!
//! TCP connection handling for a single store node.
//!
//! ## Architecture
//! - Lazy connect on first command
//! - AUTH and SELECT replayed on every (re)connect
//! - Any socket failure drops the connection; the next command reconnects

mod connection;

pub use connection::Connection;
