//! Client Module
//!
//! The command facade: one typed method per store command, all funnelled
//! through [`Client::execute`], which applies the session policy.
//!
//! ## Session State
//! - current keyspace, updated by a successful SELECT
//! - transaction flag, set by MULTI/WATCH and cleared by EXEC/DISCARD/UNWATCH
//! - subscription flag, set by a subscribe acknowledgment and cleared when
//!   an unsubscribe event reports zero remaining subscriptions
//!
//! A transport failure clears both flags, since the server side of the
//! session is gone with the socket.

use std::time::Duration;

use bytes::Bytes;

use crate::config::Config;
use crate::error::{CourierError, Result};
use crate::network::Connection;
use crate::protocol::{Catalogue, Command, Reply, ToArg};
use crate::pubsub::{remaining_subscriptions, Listen, ListenMessages, Message};

/// Commands that open a transaction on the server
const TRANSACTION_OPENERS: &[&str] = &["MULTI", "WATCH"];

/// Commands that close a transaction on the server
const TRANSACTION_CLOSERS: &[&str] = &["DISCARD", "EXEC", "UNWATCH"];

/// Commands whose replies arrive as a stream
const SUBSCRIPTION_COMMANDS: &[&str] = &["SUBSCRIBE", "PSUBSCRIBE", "UNSUBSCRIBE", "PUNSUBSCRIBE"];

/// A single logical session with the store
///
/// Not meant to be shared between threads: every concurrent caller should
/// own its own `Client`, or wrap one in a mutex.
pub struct Client {
    /// Client configuration
    config: Config,

    /// Socket to the store node
    connection: Connection,

    /// Optional arity validation table
    catalogue: Option<Catalogue>,

    /// Keyspace of the session
    db: i64,

    /// A MULTI or WATCH is pending
    transaction: bool,

    /// The connection is in subscription mode
    subscribed: bool,
}

impl Client {
    /// Create a client. The connection is opened by the first command.
    pub fn new(config: Config) -> Self {
        let connection = Connection::new(&config);
        Self {
            db: config.db,
            config,
            connection,
            catalogue: None,
            transaction: false,
            subscribed: false,
        }
    }

    /// Create a client that validates every command against `catalogue`
    pub fn with_catalogue(config: Config, catalogue: Catalogue) -> Self {
        let mut client = Self::new(config);
        client.catalogue = Some(catalogue);
        client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalogue(&self) -> Option<&Catalogue> {
        self.catalogue.as_ref()
    }

    /// Current keyspace
    pub fn db(&self) -> i64 {
        self.db
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the connection. The next command reconnects.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.transaction = false;
        self.subscribed = false;
    }

    // =========================================================================
    // Generic Dispatch
    // =========================================================================

    /// Run any command and return its reply
    ///
    /// This is the single path every typed method goes through.
    pub fn execute(&mut self, command: Command) -> Result<Reply> {
        if let Some(catalogue) = &self.catalogue {
            catalogue.validate(&command)?;
        }

        let keyword = command.keyword();
        let reply = self.dispatch(&command, &keyword)?;

        if keyword == "SELECT" && reply.is_ok() {
            if let Some(db) = command
                .arguments()
                .first()
                .and_then(|arg| std::str::from_utf8(arg).ok())
                .and_then(|arg| arg.parse::<i64>().ok())
            {
                self.db = db;
                self.connection.set_db(db);
            }
        }

        Ok(reply)
    }

    fn dispatch(&mut self, command: &Command, keyword: &str) -> Result<Reply> {
        let is_subscription = SUBSCRIPTION_COMMANDS.contains(&keyword);

        if TRANSACTION_OPENERS.contains(&keyword) {
            self.transaction = true;
        }

        if self.config.safe && !self.transaction && !self.subscribed && !is_subscription {
            match self.connection.run_command(command) {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transport() => {
                    tracing::warn!(
                        "{} failed ({}), retrying in {:?}",
                        keyword,
                        e,
                        self.config.safe_wait
                    );
                    std::thread::sleep(self.config.safe_wait);
                }
                Err(e) => return Err(e),
            }
        }

        if TRANSACTION_CLOSERS.contains(&keyword) {
            self.transaction = false;
        }

        let result = if is_subscription {
            self.subscription_command(command, keyword)
        } else {
            self.connection.run_command(command)
        };

        result.map_err(|e| self.observe_failure(e))
    }

    /// Send a (un)subscribe command and read its first acknowledgment
    fn subscription_command(&mut self, command: &Command, keyword: &str) -> Result<Reply> {
        self.connection.send_command(command)?;
        let ack = match self.connection.read_reply()? {
            Reply::Error(message) => return Err(CourierError::Server(message)),
            ack => ack,
        };

        match keyword {
            "SUBSCRIBE" | "PSUBSCRIBE" => self.subscribed = true,
            _ => {
                if remaining_subscriptions(&ack) == Some(0) {
                    self.subscribed = false;
                }
            }
        }

        Ok(ack)
    }

    /// Reset session flags when the connection did not survive an error
    fn observe_failure(&mut self, err: CourierError) -> CourierError {
        if err.is_transport() || !self.connection.is_connected() {
            self.transaction = false;
            self.subscribed = false;
        }
        err
    }

    // =========================================================================
    // Subscription Stream
    // =========================================================================

    /// Iterate over raw subscription replies until no subscription is left
    pub fn listen(&mut self) -> Listen<'_> {
        Listen::new(self)
    }

    /// Like [`Client::listen`], reshaped into [`Message`](crate::pubsub::Message)s
    pub fn listen_messages(&mut self) -> ListenMessages<'_> {
        ListenMessages::new(self)
    }

    /// Read the next streamed reply, blocking under the socket timeout
    pub fn next_event(&mut self) -> Result<Reply> {
        let result = self.connection.read_reply();
        let reply = result.map_err(|e| self.observe_failure(e))?;
        self.observe_event(reply)
    }

    /// Wait up to `wait` for the next streamed reply
    pub fn poll_event(&mut self, wait: Duration) -> Result<Option<Reply>> {
        let result = self.connection.poll_reply(wait);
        match result.map_err(|e| self.observe_failure(e))? {
            Some(reply) => self.observe_event(reply).map(Some),
            None => Ok(None),
        }
    }

    /// One step of [`Client::listen_messages`] with a bounded wait
    pub fn poll_message(&mut self, wait: Duration) -> Result<Option<Message>> {
        self.poll_event(wait)?.map(Message::from_reply).transpose()
    }

    fn observe_event(&mut self, reply: Reply) -> Result<Reply> {
        if let Reply::Error(message) = reply {
            return Err(CourierError::Server(message));
        }
        if is_final_unsubscribe(&reply) {
            self.subscribed = false;
        }
        Ok(reply)
    }

    // =========================================================================
    // Connection Commands
    // =========================================================================

    pub fn ping(&mut self) -> Result<String> {
        Ok(self.execute(Command::new("PING"))?.into_string()?.unwrap_or_default())
    }

    pub fn auth(&mut self, password: &str) -> Result<()> {
        self.execute(Command::new("AUTH").arg(password))?.into_ok()
    }

    /// Switch keyspace; the session follows on success
    pub fn select(&mut self, db: i64) -> Result<()> {
        self.execute(Command::new("SELECT").arg(&db))?.into_ok()
    }

    pub fn flushdb(&mut self) -> Result<()> {
        self.execute(Command::new("FLUSHDB"))?.into_ok()
    }

    // =========================================================================
    // Key and String Commands
    // =========================================================================

    pub fn get<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<Option<Bytes>> {
        self.execute(Command::new("GET").arg(key))?.into_bytes()
    }

    pub fn set<K: ToArg + ?Sized, V: ToArg + ?Sized>(&mut self, key: &K, value: &V) -> Result<()> {
        self.execute(Command::new("SET").arg(key).arg(value))?.into_ok()
    }

    pub fn incr<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<i64> {
        self.execute(Command::new("INCR").arg(key))?.into_integer()
    }

    pub fn incrby<K: ToArg + ?Sized>(&mut self, key: &K, amount: i64) -> Result<i64> {
        self.execute(Command::new("INCRBY").arg(key).arg(&amount))?.into_integer()
    }

    /// Delete a key, returning the number of keys removed
    pub fn del<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<i64> {
        self.execute(Command::new("DEL").arg(key))?.into_integer()
    }

    pub fn exists<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<bool> {
        Ok(self.execute(Command::new("EXISTS").arg(key))?.into_integer()? > 0)
    }

    pub fn expire<K: ToArg + ?Sized>(&mut self, key: &K, seconds: u64) -> Result<bool> {
        Ok(self.execute(Command::new("EXPIRE").arg(key).arg(&seconds))?.into_integer()? == 1)
    }

    // =========================================================================
    // List Commands
    // =========================================================================

    /// Push on the left end, returning the new length
    pub fn lpush<K: ToArg + ?Sized, V: ToArg + ?Sized>(&mut self, key: &K, value: &V) -> Result<i64> {
        self.execute(Command::new("LPUSH").arg(key).arg(value))?.into_integer()
    }

    /// Push on the right end, returning the new length
    pub fn rpush<K: ToArg + ?Sized, V: ToArg + ?Sized>(&mut self, key: &K, value: &V) -> Result<i64> {
        self.execute(Command::new("RPUSH").arg(key).arg(value))?.into_integer()
    }

    pub fn lpop<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<Option<Bytes>> {
        self.execute(Command::new("LPOP").arg(key))?.into_bytes()
    }

    pub fn rpop<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<Option<Bytes>> {
        self.execute(Command::new("RPOP").arg(key))?.into_bytes()
    }

    /// Blocking left pop; `None` when `timeout` seconds elapsed
    pub fn blpop<K: ToArg + ?Sized>(&mut self, key: &K, timeout: u64) -> Result<Option<(Bytes, Bytes)>> {
        let reply = self.execute(Command::new("BLPOP").arg(key).arg(&timeout))?;
        pop_pair(reply)
    }

    /// Blocking right pop; `None` when `timeout` seconds elapsed
    pub fn brpop<K: ToArg + ?Sized>(&mut self, key: &K, timeout: u64) -> Result<Option<(Bytes, Bytes)>> {
        let reply = self.execute(Command::new("BRPOP").arg(key).arg(&timeout))?;
        pop_pair(reply)
    }

    /// Atomically pop the right end of `source` and push it on the left of `destination`
    pub fn rpoplpush<S: ToArg + ?Sized, D: ToArg + ?Sized>(
        &mut self,
        source: &S,
        destination: &D,
    ) -> Result<Option<Bytes>> {
        self.execute(Command::new("RPOPLPUSH").arg(source).arg(destination))?
            .into_bytes()
    }

    /// Blocking variant of [`Client::rpoplpush`]
    pub fn brpoplpush<S: ToArg + ?Sized, D: ToArg + ?Sized>(
        &mut self,
        source: &S,
        destination: &D,
        timeout: u64,
    ) -> Result<Option<Bytes>> {
        self.execute(
            Command::new("BRPOPLPUSH")
                .arg(source)
                .arg(destination)
                .arg(&timeout),
        )?
        .into_bytes()
    }

    pub fn llen<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<i64> {
        self.execute(Command::new("LLEN").arg(key))?.into_integer()
    }

    pub fn lrange<K: ToArg + ?Sized>(&mut self, key: &K, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        self.execute(Command::new("LRANGE").arg(key).arg(&start).arg(&stop))?
            .into_bytes_vec()
    }

    // =========================================================================
    // Hash Commands
    // =========================================================================

    pub fn hget<K: ToArg + ?Sized, F: ToArg + ?Sized>(&mut self, key: &K, field: &F) -> Result<Option<Bytes>> {
        self.execute(Command::new("HGET").arg(key).arg(field))?.into_bytes()
    }

    /// Set a field, returning 1 when the field is new
    pub fn hset<K: ToArg + ?Sized, F: ToArg + ?Sized, V: ToArg + ?Sized>(
        &mut self,
        key: &K,
        field: &F,
        value: &V,
    ) -> Result<i64> {
        self.execute(Command::new("HSET").arg(key).arg(field).arg(value))?
            .into_integer()
    }

    pub fn hdel<K: ToArg + ?Sized, F: ToArg + ?Sized>(&mut self, key: &K, field: &F) -> Result<i64> {
        self.execute(Command::new("HDEL").arg(key).arg(field))?.into_integer()
    }

    pub fn hkeys<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<Vec<Bytes>> {
        self.execute(Command::new("HKEYS").arg(key))?.into_bytes_vec()
    }

    pub fn hvals<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<Vec<Bytes>> {
        self.execute(Command::new("HVALS").arg(key))?.into_bytes_vec()
    }

    /// All field/value pairs of a hash
    pub fn hgetall<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<Vec<(Bytes, Bytes)>> {
        let flat = self.execute(Command::new("HGETALL").arg(key))?.into_bytes_vec()?;
        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            pairs.push((field, value));
        }
        Ok(pairs)
    }

    // =========================================================================
    // Transaction Commands
    // =========================================================================

    pub fn watch<K: ToArg + ?Sized>(&mut self, key: &K) -> Result<()> {
        self.execute(Command::new("WATCH").arg(key))?.into_ok()
    }

    pub fn unwatch(&mut self) -> Result<()> {
        self.execute(Command::new("UNWATCH"))?.into_ok()
    }

    /// Open a transaction. Commands sent until [`Client::exec`] reply `QUEUED`,
    /// so queue them with [`Client::execute`] rather than the typed methods.
    pub fn multi(&mut self) -> Result<()> {
        self.execute(Command::new("MULTI"))?.into_ok()
    }

    /// Commit the transaction
    ///
    /// Returns `None` when a watched key changed and nothing was executed.
    pub fn exec(&mut self) -> Result<Option<Vec<Reply>>> {
        self.execute(Command::new("EXEC"))?.into_array()
    }

    pub fn discard(&mut self) -> Result<()> {
        self.execute(Command::new("DISCARD"))?.into_ok()
    }

    // =========================================================================
    // Pub/Sub Commands
    // =========================================================================

    /// Publish a message, returning the number of receivers
    pub fn publish<C: ToArg + ?Sized, M: ToArg + ?Sized>(&mut self, channel: &C, message: &M) -> Result<i64> {
        self.execute(Command::new("PUBLISH").arg(channel).arg(message))?
            .into_integer()
    }

    /// Subscribe to channels, returning the first acknowledgment
    ///
    /// Acknowledgments for the remaining channels arrive through
    /// [`Client::listen`].
    pub fn subscribe<C: ToArg>(&mut self, channels: &[C]) -> Result<Reply> {
        self.execute(Command::new("SUBSCRIBE").args(channels))
    }

    /// Subscribe to channel patterns
    pub fn psubscribe<C: ToArg>(&mut self, patterns: &[C]) -> Result<Reply> {
        self.execute(Command::new("PSUBSCRIBE").args(patterns))
    }

    /// Unsubscribe from channels; an empty slice unsubscribes from all
    pub fn unsubscribe<C: ToArg>(&mut self, channels: &[C]) -> Result<Reply> {
        self.execute(Command::new("UNSUBSCRIBE").args(channels))
    }

    /// Unsubscribe from patterns; an empty slice unsubscribes from all
    pub fn punsubscribe<C: ToArg>(&mut self, patterns: &[C]) -> Result<Reply> {
        self.execute(Command::new("PUNSUBSCRIBE").args(patterns))
    }
}

/// Split a blocking pop reply into `(list, value)`
fn pop_pair(reply: Reply) -> Result<Option<(Bytes, Bytes)>> {
    let Some(items) = reply.into_array()? else {
        return Ok(None);
    };
    let mut items = items.into_iter();
    match (items.next(), items.next()) {
        (Some(list), Some(value)) => match (list.into_bytes()?, value.into_bytes()?) {
            (Some(list), Some(value)) => Ok(Some((list, value))),
            _ => Ok(None),
        },
        _ => Err(CourierError::UnexpectedReply {
            expected: "two-element array",
            found: "short array".to_string(),
        }),
    }
}

/// An unsubscribe event that leaves no subscription behind
fn is_final_unsubscribe(reply: &Reply) -> bool {
    let Reply::Array(items) = reply else {
        return false;
    };
    let kind = items.first().and_then(Reply::as_bytes);
    matches!(kind, Some(b"unsubscribe") | Some(b"punsubscribe"))
        && remaining_subscriptions(reply) == Some(0)
}
