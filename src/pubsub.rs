//! Pub/Sub Module
//!
//! Reading subscription streams, in the foreground through [`Listen`] or on a
//! dedicated thread through [`Subscriber`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};

use crate::client::Client;
use crate::config::Config;
use crate::error::{CourierError, Result};
use crate::protocol::Reply;

/// How long a background subscriber waits for data before re-checking `stop`
pub const POLL_SLICE: Duration = Duration::from_millis(200);

// =============================================================================
// Messages
// =============================================================================

/// A subscription event with labelled fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Event type: `message`, `pmessage`, `subscribe`, `unsubscribe`, ...
    pub kind: String,

    /// Matching pattern, only set for `pmessage`
    pub pattern: Option<Bytes>,

    pub channel: Bytes,

    /// Payload for messages, remaining subscription count for (un)subscribe events
    pub data: Reply,
}

impl Message {
    /// Reshape a 3 or 4 element subscription reply
    pub fn from_reply(reply: Reply) -> Result<Self> {
        let items = match reply {
            Reply::Array(items) if items.len() == 3 || items.len() == 4 => items,
            other => {
                return Err(CourierError::UnexpectedReply {
                    expected: "subscription event",
                    found: other.to_string(),
                })
            }
        };

        let mut items = items.into_iter();
        let kind = items
            .next()
            .and_then(|r| r.into_string().ok().flatten())
            .unwrap_or_default();

        let pattern = if kind == "pmessage" {
            items.next().and_then(|r| r.into_bytes().ok().flatten())
        } else {
            None
        };

        let channel = items
            .next()
            .and_then(|r| r.into_bytes().ok().flatten())
            .unwrap_or_default();
        let data = items.next().unwrap_or(Reply::Nil);

        Ok(Self {
            kind,
            pattern,
            channel,
            data,
        })
    }

    /// Message payload, when the event carries one
    pub fn payload(&self) -> Option<&[u8]> {
        self.data.as_bytes()
    }

    /// True for `message` and `pmessage` events
    pub fn is_message(&self) -> bool {
        self.kind == "message" || self.kind == "pmessage"
    }
}

/// Remaining subscription count carried by a (un)subscribe event
pub fn remaining_subscriptions(reply: &Reply) -> Option<i64> {
    match reply {
        Reply::Array(items) if items.len() == 3 => items[2].as_integer(),
        _ => None,
    }
}

// =============================================================================
// Foreground Listening
// =============================================================================

/// Iterator over raw subscription replies
///
/// Ends after the event that leaves no subscription, or after an error.
pub struct Listen<'a> {
    client: &'a mut Client,
    failed: bool,
}

impl<'a> Listen<'a> {
    pub(crate) fn new(client: &'a mut Client) -> Self {
        Self {
            client,
            failed: false,
        }
    }
}

impl Iterator for Listen<'_> {
    type Item = Result<Reply>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.client.is_subscribed() {
            return None;
        }
        let event = self.client.next_event();
        self.failed = event.is_err();
        Some(event)
    }
}

/// Iterator over labelled subscription events
pub struct ListenMessages<'a> {
    inner: Listen<'a>,
}

impl<'a> ListenMessages<'a> {
    pub(crate) fn new(client: &'a mut Client) -> Self {
        Self {
            inner: Listen::new(client),
        }
    }
}

impl Iterator for ListenMessages<'_> {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|event| event.and_then(Message::from_reply))
    }
}

// =============================================================================
// Background Subscriber
// =============================================================================

/// What to subscribe to
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    pub channels: Vec<String>,
    pub patterns: Vec<String>,
}

impl Subscription {
    pub fn channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
            patterns: Vec::new(),
        }
    }

    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }
}

/// A listener running on its own thread with its own connection
///
/// Cancellation is cooperative: [`Subscriber::stop`] is observed between
/// poll slices of [`POLL_SLICE`].
pub struct Subscriber {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
    messages: Option<Receiver<Message>>,
}

impl Subscriber {
    /// Spawn a subscriber that forwards events over a channel
    pub fn spawn(config: Config, subscription: Subscription) -> Result<Self> {
        let (tx, rx): (Sender<Message>, Receiver<Message>) = channel::unbounded();
        let mut subscriber = Self::spawn_with_callback(config, subscription, move |message| {
            // A dropped receiver only means nobody is reading any more
            let _ = tx.send(message);
        })?;
        subscriber.messages = Some(rx);
        Ok(subscriber)
    }

    /// Spawn a subscriber that calls `callback` for every event on its thread
    pub fn spawn_with_callback<F>(config: Config, subscription: Subscription, mut callback: F) -> Result<Self>
    where
        F: FnMut(Message) + Send + 'static,
    {
        if subscription.channels.is_empty() && subscription.patterns.is_empty() {
            return Err(CourierError::Config(
                "subscriber needs at least one channel or pattern".to_string(),
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("courier-subscriber".to_string())
            .spawn(move || run_subscriber(config, subscription, thread_stop, &mut callback))?;

        Ok(Self {
            stop,
            handle: Some(handle),
            messages: None,
        })
    }

    /// Events received so far; only set for [`Subscriber::spawn`]
    pub fn messages(&self) -> Option<&Receiver<Message>> {
        self.messages.as_ref()
    }

    /// Ask the thread to stop
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Wait for the thread to finish and return its outcome
    pub fn join(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| CourierError::Transport("subscriber thread panicked".to_string()))?,
            None => Ok(()),
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_subscriber<F>(
    config: Config,
    subscription: Subscription,
    stop: Arc<AtomicBool>,
    callback: &mut F,
) -> Result<()>
where
    F: FnMut(Message),
{
    let mut client = Client::new(config);

    if !subscription.channels.is_empty() {
        let ack = client.subscribe(&subscription.channels)?;
        callback(Message::from_reply(ack)?);
    }
    if !subscription.patterns.is_empty() {
        let ack = client.psubscribe(&subscription.patterns)?;
        callback(Message::from_reply(ack)?);
    }
    tracing::debug!(
        "Subscriber listening on {} channel(s), {} pattern(s)",
        subscription.channels.len(),
        subscription.patterns.len()
    );

    while client.is_subscribed() && !stop.load(Ordering::Relaxed) {
        if let Some(message) = client.poll_message(POLL_SLICE)? {
            callback(message);
        }
    }

    client.disconnect();
    tracing::debug!("Subscriber stopped");
    Ok(())
}
