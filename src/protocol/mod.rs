//! Protocol Module
//!
//! Defines the wire protocol spoken with the store.
//!
//! ## Protocol Format
//!
//! ### Request Format
//! Every request is an array of length-prefixed bulk strings:
//! ```text
//! *3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n
//! ```
//!
//! ### Reply Tags
//! - `+`: status line
//! - `-`: error line
//! - `:`: integer
//! - `$`: bulk string (`$-1` is nil)
//! - `*`: array (`*-1` is nil)

mod catalogue;
mod codec;
mod command;
mod reply;

pub use catalogue::{Catalogue, CommandFlag, CommandSpec};
pub use codec::{
    encode_command, encode_reply, read_command, read_reply, write_command, write_reply,
    MAX_BULK_SIZE,
};
pub use command::{Command, ToArg};
pub use reply::Reply;
