//! Command catalogue
//!
//! Static metadata about store commands: arity, flags and key positions.
//! The catalogue is documentation and validation data. It is built by an
//! explicit call and never mutated afterwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Command;
use crate::error::{CourierError, Result};

/// Command behaviour flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandFlag {
    Write,
    Readonly,
    /// Refused when the store is out of memory
    Denyoom,
    Admin,
    Pubsub,
    Noscript,
    Random,
    Blocking,
    Loading,
    Stale,
    Fast,
    ForceReplication,
}

/// Metadata for one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Canonical upper-case name, e.g. `GET` or `CONFIG GET`
    pub name: String,

    /// Minimum number of tokens, the command name included
    pub min_arity: usize,

    /// Maximum number of tokens, `None` when variadic
    #[serde(default)]
    pub max_arity: Option<usize>,

    #[serde(default)]
    pub flags: Vec<CommandFlag>,

    /// Token index of the first key, 0 when the command takes no key
    #[serde(default)]
    pub first_key: usize,

    /// Token index of the last key, negative values count from the end
    #[serde(default)]
    pub last_key: i64,

    /// Distance between repeated keys
    #[serde(default)]
    pub key_step: usize,

    #[serde(default)]
    pub summary: Option<String>,
}

impl CommandSpec {
    fn new(name: &str, min_arity: usize, max_arity: Option<usize>, flags: &[CommandFlag]) -> Self {
        Self {
            name: name.to_string(),
            min_arity,
            max_arity,
            flags: flags.to_vec(),
            first_key: 0,
            last_key: 0,
            key_step: 0,
            summary: None,
        }
    }

    fn keys(mut self, first: usize, last: i64, step: usize) -> Self {
        self.first_key = first;
        self.last_key = last;
        self.key_step = step;
        self
    }

    fn summary(mut self, summary: &str) -> Self {
        self.summary = Some(summary.to_string());
        self
    }

    pub fn has_flag(&self, flag: CommandFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// Check a token count against the arity bounds
    pub fn accepts(&self, token_count: usize) -> bool {
        token_count >= self.min_arity && self.max_arity.map_or(true, |max| token_count <= max)
    }
}

/// Immutable table of command metadata
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    specs: HashMap<String, CommandSpec>,
}

impl Catalogue {
    /// Catalogue of every command this crate wraps
    pub fn builtin() -> Self {
        use CommandFlag::*;

        let specs = vec![
            CommandSpec::new("PING", 1, Some(2), &[Stale, Fast]).summary("Ping the server"),
            CommandSpec::new("AUTH", 2, Some(3), &[Noscript, Loading, Stale, Fast])
                .summary("Authenticate to the server"),
            CommandSpec::new("SELECT", 2, Some(2), &[Loading, Fast])
                .summary("Change the selected database for the current connection"),
            CommandSpec::new("FLUSHDB", 1, Some(2), &[Write])
                .summary("Remove all keys from the current database"),
            CommandSpec::new("GET", 2, Some(2), &[Readonly, Fast])
                .keys(1, 1, 1)
                .summary("Get the value of a key"),
            CommandSpec::new("SET", 3, None, &[Write, Denyoom])
                .keys(1, 1, 1)
                .summary("Set the string value of a key"),
            CommandSpec::new("INCR", 2, Some(2), &[Write, Denyoom, Fast])
                .keys(1, 1, 1)
                .summary("Increment the integer value of a key by one"),
            CommandSpec::new("INCRBY", 3, Some(3), &[Write, Denyoom, Fast])
                .keys(1, 1, 1)
                .summary("Increment the integer value of a key by the given amount"),
            CommandSpec::new("DEL", 2, None, &[Write])
                .keys(1, -1, 1)
                .summary("Delete a key"),
            CommandSpec::new("EXISTS", 2, None, &[Readonly, Fast])
                .keys(1, -1, 1)
                .summary("Determine if a key exists"),
            CommandSpec::new("EXPIRE", 3, Some(4), &[Write, Fast])
                .keys(1, 1, 1)
                .summary("Set a key's time to live in seconds"),
            CommandSpec::new("LPUSH", 3, None, &[Write, Denyoom, Fast])
                .keys(1, 1, 1)
                .summary("Prepend one or multiple values to a list"),
            CommandSpec::new("RPUSH", 3, None, &[Write, Denyoom, Fast])
                .keys(1, 1, 1)
                .summary("Append one or multiple values to a list"),
            CommandSpec::new("LPOP", 2, Some(3), &[Write, Fast])
                .keys(1, 1, 1)
                .summary("Remove and get the first element in a list"),
            CommandSpec::new("RPOP", 2, Some(3), &[Write, Fast])
                .keys(1, 1, 1)
                .summary("Remove and get the last element in a list"),
            CommandSpec::new("BLPOP", 3, None, &[Write, Noscript, Blocking])
                .keys(1, -2, 1)
                .summary("Remove and get the first element in a list, or block until one is available"),
            CommandSpec::new("BRPOP", 3, None, &[Write, Noscript, Blocking])
                .keys(1, -2, 1)
                .summary("Remove and get the last element in a list, or block until one is available"),
            CommandSpec::new("RPOPLPUSH", 3, Some(3), &[Write, Denyoom])
                .keys(1, 2, 1)
                .summary("Remove the last element in a list, prepend it to another list and return it"),
            CommandSpec::new("BRPOPLPUSH", 4, Some(4), &[Write, Denyoom, Noscript, Blocking])
                .keys(1, 2, 1)
                .summary("Pop an element from a list, push it to another list and return it; or block until one is available"),
            CommandSpec::new("LLEN", 2, Some(2), &[Readonly, Fast])
                .keys(1, 1, 1)
                .summary("Get the length of a list"),
            CommandSpec::new("LRANGE", 4, Some(4), &[Readonly])
                .keys(1, 1, 1)
                .summary("Get a range of elements from a list"),
            CommandSpec::new("HGET", 3, Some(3), &[Readonly, Fast])
                .keys(1, 1, 1)
                .summary("Get the value of a hash field"),
            CommandSpec::new("HSET", 4, None, &[Write, Denyoom, Fast])
                .keys(1, 1, 1)
                .summary("Set the string value of a hash field"),
            CommandSpec::new("HDEL", 3, None, &[Write, Fast])
                .keys(1, 1, 1)
                .summary("Delete one or more hash fields"),
            CommandSpec::new("HKEYS", 2, Some(2), &[Readonly])
                .keys(1, 1, 1)
                .summary("Get all the fields in a hash"),
            CommandSpec::new("HVALS", 2, Some(2), &[Readonly])
                .keys(1, 1, 1)
                .summary("Get all the values in a hash"),
            CommandSpec::new("HGETALL", 2, Some(2), &[Readonly, Random])
                .keys(1, 1, 1)
                .summary("Get all the fields and values in a hash"),
            CommandSpec::new("WATCH", 2, None, &[Noscript, Fast])
                .keys(1, -1, 1)
                .summary("Watch the given keys to determine execution of the MULTI/EXEC block"),
            CommandSpec::new("UNWATCH", 1, Some(1), &[Noscript, Fast])
                .summary("Forget about all watched keys"),
            CommandSpec::new("MULTI", 1, Some(1), &[Noscript, Fast])
                .summary("Mark the start of a transaction block"),
            CommandSpec::new("EXEC", 1, Some(1), &[Noscript, Loading, Stale])
                .summary("Execute all commands issued after MULTI"),
            CommandSpec::new("DISCARD", 1, Some(1), &[Noscript, Fast])
                .summary("Discard all commands issued after MULTI"),
            CommandSpec::new("PUBLISH", 3, Some(3), &[Pubsub, Loading, Stale, Fast])
                .summary("Post a message to a channel"),
            CommandSpec::new("SUBSCRIBE", 2, None, &[Pubsub, Noscript, Loading, Stale])
                .summary("Listen for messages published to the given channels"),
            CommandSpec::new("PSUBSCRIBE", 2, None, &[Pubsub, Noscript, Loading, Stale])
                .summary("Listen for messages published to channels matching the given patterns"),
            CommandSpec::new("UNSUBSCRIBE", 1, None, &[Pubsub, Noscript, Loading, Stale])
                .summary("Stop listening for messages posted to the given channels"),
            CommandSpec::new("PUNSUBSCRIBE", 1, None, &[Pubsub, Noscript, Loading, Stale])
                .summary("Stop listening for messages posted to channels matching the given patterns"),
        ];

        Self::from_specs(specs)
    }

    /// Build a catalogue from explicit entries
    pub fn from_specs(specs: impl IntoIterator<Item = CommandSpec>) -> Self {
        let specs = specs
            .into_iter()
            .map(|spec| (spec.name.to_ascii_uppercase(), spec))
            .collect();
        Self { specs }
    }

    /// Parse a JSON array of [`CommandSpec`] entries
    pub fn from_json(json: &str) -> Result<Self> {
        let specs: Vec<CommandSpec> = serde_json::from_str(json)
            .map_err(|e| CourierError::Config(format!("invalid command catalogue: {}", e)))?;
        Ok(Self::from_specs(specs))
    }

    /// Look up a command by name, case-insensitively
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        let key = name.split_whitespace().collect::<Vec<_>>().join(" ");
        self.specs.get(&key.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Sorted command names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check a command against its arity bounds
    ///
    /// Commands missing from the catalogue are accepted as-is.
    pub fn validate(&self, command: &Command) -> Result<()> {
        let Some(spec) = self.get(command.name()) else {
            return Ok(());
        };

        let word_count = spec.name.split_whitespace().count();
        let token_count = word_count + command.arguments().len();
        if !spec.accepts(token_count) {
            return Err(CourierError::InvalidCommand(format!(
                "wrong number of arguments for '{}': {} given",
                spec.name,
                token_count - 1
            )));
        }
        Ok(())
    }

    /// Extract the key arguments of a command using its key positions
    pub fn keys<'a>(&self, command: &'a Command) -> Vec<&'a [u8]> {
        let Some(spec) = self.get(command.name()) else {
            return Vec::new();
        };
        if spec.first_key == 0 || spec.key_step == 0 {
            return Vec::new();
        }

        // Positions count the name as token 0
        let args = command.arguments();
        let total = args.len() as i64 + 1;
        let last = if spec.last_key < 0 {
            total + spec.last_key
        } else {
            spec.last_key
        };

        let mut keys = Vec::new();
        let mut pos = spec.first_key as i64;
        while pos <= last && pos < total {
            keys.push(&args[(pos - 1) as usize][..]);
            pos += spec.key_step as i64;
        }
        keys
    }
}
