//! Reliable queues
//!
//! Sending and receiving envelopes over store lists, with the safe
//! (staged) receive protocol and the transactional release + send.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::envelope::unix_time;
use super::rpc::{Handler, HandlerResult};
use super::signing;
use super::{Envelope, JsonSerializer, Serializer};
use crate::client::Client;
use crate::error::{CourierError, Result};
use crate::protocol::{Command, Reply};

/// How long a receive may wait for an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Do not block; return at once when the queue is empty
    Immediate,

    /// Block until an envelope arrives
    Forever,

    /// Block for at most this many seconds
    Seconds(u64),
}

impl Wait {
    /// Timeout argument for the store's blocking pops, `None` when not blocking
    fn blocking_timeout(self) -> Option<u64> {
        match self {
            Wait::Immediate => None,
            Wait::Forever => Some(0),
            Wait::Seconds(secs) => Some(secs),
        }
    }
}

impl From<i64> for Wait {
    /// `-1` (or any negative) is non-blocking, `0` blocks forever
    fn from(timeout: i64) -> Self {
        match timeout {
            t if t < 0 => Wait::Immediate,
            0 => Wait::Forever,
            t => Wait::Seconds(t as u64),
        }
    }
}

/// Per-message send options
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Return address; the connector name when unset
    pub src: Option<String>,

    /// Function to invoke on the receiving worker
    pub funcname: Option<String>,

    /// Mark the payload as an error description
    pub exception: bool,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    pub fn funcname(mut self, funcname: impl Into<String>) -> Self {
        self.funcname = Some(funcname.into());
        self
    }

    pub fn exception(mut self, exception: bool) -> Self {
        self.exception = exception;
        self
    }
}

/// Queue endpoint and RPC peer bound to one [`Client`]
///
/// The connector's name is also the queue it receives on. In safe mode every
/// received envelope is parked in a private staging list until it is
/// released, replied to, transferred or returned with `unreceive`.
pub struct Connector {
    /// Session used for every store command
    pub(super) client: Client,

    /// Identity and inbound queue name
    pub(super) name: String,

    /// Sender tag written into every envelope
    pub(super) ctype: String,

    /// Default wait for `run` and `incoming`
    pub(super) timeout: Wait,

    /// LPUSH (FIFO) or RPUSH (LIFO); pops always take the right end
    pub(super) fifo: bool,

    /// Stage received envelopes until released
    pub(super) safe: bool,

    /// Signing secret
    pub(super) secret: Option<Vec<u8>>,

    pub(super) serializer: Box<dyn Serializer>,

    /// Functions served by `worker`
    pub(super) functions: HashMap<String, Handler>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name)
            .field("ctype", &self.ctype)
            .field("timeout", &self.timeout)
            .field("fifo", &self.fifo)
            .field("safe", &self.safe)
            .field("signed", &self.secret.is_some())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Connector {
    /// Create a FIFO, unsafe, unsigned connector with a random name
    pub fn new(client: Client) -> Self {
        ConnectorBuilder::new().build(client)
    }

    /// Create a connector builder
    pub fn builder() -> ConnectorBuilder {
        ConnectorBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn is_fifo(&self) -> bool {
        self.fifo
    }

    pub fn timeout(&self) -> Wait {
        self.timeout
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn into_client(self) -> Client {
        self.client
    }

    /// Staging list name for a receive happening now
    fn staging_name(&self) -> String {
        format!("{}:{}:{}", self.name, std::process::id(), unix_time() as u64)
    }

    /// One-shot reply address
    fn reply_address(&self) -> String {
        format!("{}:{}:{}", self.name, unix_time(), Uuid::new_v4())
    }

    // =========================================================================
    // Send
    // =========================================================================

    /// Send `val` to `dst`, returning the queue length after the push
    pub fn send(&mut self, dst: &str, val: Value) -> Result<i64> {
        self.send_with(dst, val, SendOptions::default())
    }

    /// Send with an explicit return address, function name or exception flag
    pub fn send_with(&mut self, dst: &str, val: Value, options: SendOptions) -> Result<i64> {
        let command = self.push_command(dst, val, options)?;
        self.client.execute(command)?.into_integer()
    }

    /// Build the push of a freshly stamped, serialized and signed envelope
    fn push_command(&self, dst: &str, val: Value, options: SendOptions) -> Result<Command> {
        let src = options.src.unwrap_or_else(|| self.name.clone());
        let mut envelope =
            Envelope::new(src, self.ctype.as_str(), dst, val).with_exception(options.exception);
        if let Some(funcname) = options.funcname {
            envelope = envelope.with_funcname(funcname);
        }

        let mut payload = self.serializer.serialize(&envelope)?;
        if let Some(secret) = &self.secret {
            payload = signing::sign(&payload, secret);
        }

        let verb = if self.fifo { "LPUSH" } else { "RPUSH" };
        Ok(Command::new(verb).arg(dst).arg(&payload))
    }

    // =========================================================================
    // Receive
    // =========================================================================

    /// Receive from this connector's own queue
    ///
    /// `Ok(None)` means nothing was available within `wait`.
    pub fn receive(&mut self, wait: Wait) -> Result<Option<Envelope>> {
        let queue = self.name.clone();
        self.receive_from(&queue, wait)
    }

    /// Receive from an arbitrary queue
    pub fn receive_from(&mut self, queue: &str, wait: Wait) -> Result<Option<Envelope>> {
        let staging = self.staging_name();

        let raw = match (self.safe, wait.blocking_timeout()) {
            (true, None) => self.client.rpoplpush(queue, &staging)?,
            (true, Some(timeout)) => self.client.brpoplpush(queue, &staging, timeout)?,
            (false, None) => self.client.rpop(queue)?,
            (false, Some(timeout)) => self.client.brpop(queue, timeout)?.map(|(_, value)| value),
        };
        let Some(raw) = raw else {
            return Ok(None);
        };

        let mut envelope = match self.decode(&raw) {
            Ok(envelope) => envelope,
            Err(e) if self.safe => {
                tracing::warn!("Rejected envelope from {}, kept in {}: {}", queue, staging, e);
                return Err(CourierError::Rejected {
                    srcack: staging,
                    reason: Box::new(e),
                });
            }
            Err(e) => {
                tracing::warn!("Rejected envelope from {}: {}", queue, e);
                return Err(e);
            }
        };
        envelope.srcack = if self.safe { Some(staging) } else { None };
        tracing::trace!("Received envelope from {} on {}", envelope.src, queue);

        Ok(Some(envelope))
    }

    /// Verify and deserialize a popped message
    fn decode(&self, raw: &[u8]) -> Result<Envelope> {
        let payload = match &self.secret {
            Some(secret) => signing::verify(raw, secret)?,
            None => raw,
        };
        self.serializer.deserialize(payload)
    }

    /// Return a staged envelope to this connector's queue, unprocessed
    pub fn unreceive(&mut self, envelope: &Envelope) -> Result<Option<Bytes>> {
        match envelope.srcack() {
            Some(staging) => self.unreceive_staged(staging),
            None => Ok(None),
        }
    }

    /// Drop a staged envelope: processing is complete
    pub fn release(&mut self, envelope: &Envelope) -> Result<Option<Bytes>> {
        match envelope.srcack() {
            Some(staging) => self.release_staged(staging),
            None => Ok(None),
        }
    }

    /// [`Connector::unreceive`] by staging list name
    ///
    /// Recovers a message whose receive failed with
    /// [`CourierError::Rejected`].
    pub fn unreceive_staged(&mut self, staging: &str) -> Result<Option<Bytes>> {
        self.client.rpoplpush(staging, &self.name)
    }

    /// [`Connector::release`] by staging list name
    pub fn release_staged(&mut self, staging: &str) -> Result<Option<Bytes>> {
        self.client.rpop(staging)
    }

    /// Keep receiving with the connector timeout until nothing is available
    pub fn incoming(&mut self) -> Incoming<'_> {
        Incoming {
            connector: self,
            done: false,
        }
    }

    // =========================================================================
    // Release + Send
    // =========================================================================

    /// Atomically release `envelope` and send `new_val` to `dst`
    ///
    /// Returns the transaction results, or `None` when a conflicting change to
    /// the staging list aborted the commit and `force` is false. With `force`
    /// the whole watch/multi/exec cycle is retried until it commits.
    pub fn transfer(
        &mut self,
        dst: &str,
        envelope: &Envelope,
        new_val: Value,
        force: bool,
    ) -> Result<Option<Vec<Reply>>> {
        self.release_and_send(envelope, dst, new_val, SendOptions::default(), force)
    }

    /// Atomically release `envelope` and answer its sender
    pub fn reply(
        &mut self,
        envelope: &Envelope,
        new_val: Value,
        force: bool,
        exception: bool,
    ) -> Result<Option<Vec<Reply>>> {
        let options = SendOptions::new().exception(exception);
        let dst = envelope.src.clone();
        self.release_and_send(envelope, &dst, new_val, options, force)
    }

    fn release_and_send(
        &mut self,
        envelope: &Envelope,
        dst: &str,
        new_val: Value,
        options: SendOptions,
        force: bool,
    ) -> Result<Option<Vec<Reply>>> {
        loop {
            if let Some(staging) = envelope.srcack() {
                self.client.watch(staging)?;
            }
            self.client.multi()?;

            if let Err(e) = self.queue_release_and_send(envelope, dst, new_val.clone(), options.clone()) {
                if self.client.in_transaction() {
                    // Keep the queueing error
                    let _ = self.client.discard();
                }
                return Err(e);
            }

            match self.client.exec()? {
                Some(results) => return Ok(Some(results)),
                None => {
                    tracing::debug!(
                        "Commit aborted, staging list {:?} changed",
                        envelope.srcack()
                    );
                    if !force {
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn queue_release_and_send(
        &mut self,
        envelope: &Envelope,
        dst: &str,
        new_val: Value,
        options: SendOptions,
    ) -> Result<()> {
        if let Some(staging) = envelope.srcack() {
            self.client.execute(Command::new("RPOP").arg(staging))?;
        }
        let push = self.push_command(dst, new_val, options)?;
        self.client.execute(push)?;
        Ok(())
    }

    // =========================================================================
    // Request / Response
    // =========================================================================

    /// Send to `dst` and wait for the answer on a one-shot reply address
    pub fn send_receive(
        &mut self,
        dst: &str,
        val: Value,
        wait: Wait,
        funcname: Option<&str>,
    ) -> Result<Option<Envelope>> {
        let reply_to = self.reply_address();
        let mut options = SendOptions::new().src(reply_to.as_str());
        if let Some(funcname) = funcname {
            options = options.funcname(funcname);
        }

        self.send_with(dst, val, options)?;
        self.receive_from(&reply_to, wait)
    }

    /// Register a function served by [`Connector::worker`]
    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value], &Map<String, Value>) -> HandlerResult + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
    }

    /// Names of the registered functions
    pub fn functions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Iterator returned by [`Connector::incoming`]
pub struct Incoming<'a> {
    connector: &'a mut Connector,
    done: bool,
}

impl Iterator for Incoming<'_> {
    type Item = Result<Envelope>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let wait = self.connector.timeout;
        match self.connector.receive(wait) {
            Ok(Some(envelope)) => Some(Ok(envelope)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for Connector
pub struct ConnectorBuilder {
    name: Option<String>,
    ctype: String,
    timeout: Wait,
    fifo: bool,
    safe: bool,
    secret: Option<Vec<u8>>,
    serializer: Box<dyn Serializer>,
    functions: HashMap<String, Handler>,
}

impl Default for ConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            ctype: String::new(),
            timeout: Wait::Forever,
            fifo: true,
            safe: false,
            secret: None,
            serializer: Box::new(JsonSerializer),
            functions: HashMap::new(),
        }
    }

    /// Set the identity; a random UUID is used otherwise
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the sender tag
    pub fn ctype(mut self, ctype: impl Into<String>) -> Self {
        self.ctype = ctype.into();
        self
    }

    /// Set the default wait used by `run` and `incoming`
    pub fn timeout(mut self, timeout: Wait) -> Self {
        self.timeout = timeout;
        self
    }

    /// FIFO (default) or LIFO queue order
    pub fn fifo(mut self, fifo: bool) -> Self {
        self.fifo = fifo;
        self
    }

    /// Enable staged (crash tolerant) receives
    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    /// Sign sent envelopes and verify received ones
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Replace the JSON serializer
    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Box::new(serializer);
        self
    }

    /// Register a function served by `worker`
    pub fn function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&[Value], &Map<String, Value>) -> HandlerResult + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
        self
    }

    pub fn build(self, client: Client) -> Connector {
        Connector {
            client,
            name: self
                .name
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ctype: self.ctype,
            timeout: self.timeout,
            fifo: self.fifo,
            safe: self.safe,
            secret: self.secret,
            serializer: self.serializer,
            functions: self.functions,
        }
    }
}
