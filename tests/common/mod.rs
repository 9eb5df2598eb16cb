//! In-process fake store for integration tests
//!
//! Speaks the wire protocol over TCP on 127.0.0.1 and implements the command
//! subset the crate uses: strings, counters, lists with blocking pops,
//! hashes, WATCH/MULTI/EXEC, SELECT/AUTH and pub/sub. Every connection is
//! served by its own thread; all threads share one state behind a mutex and
//! a condvar that wakes blocked pops.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use courier::config::ConfigBuilder;
use courier::protocol::{read_command, write_reply, Command, Reply};
use courier::{Client, Config};

type Key = Vec<u8>;
type SharedWriter = Arc<Mutex<BufWriter<TcpStream>>>;

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Clone)]
enum Entry {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
}

struct Listener {
    writer: SharedWriter,
    channels: BTreeSet<Key>,
    patterns: BTreeSet<Key>,
}

#[derive(Default)]
struct State {
    dbs: HashMap<i64, HashMap<Key, Entry>>,

    /// Last write stamp per key, for WATCH
    versions: HashMap<(i64, Key), u64>,
    clock: u64,

    listeners: HashMap<u64, Listener>,

    /// Pub/sub deliveries produced under the lock, written after it is released
    outbox: Vec<(SharedWriter, Reply)>,

    /// Keyword of every command received, in order
    log: Vec<String>,
}

impl State {
    fn db(&mut self, db: i64) -> &mut HashMap<Key, Entry> {
        self.dbs.entry(db).or_default()
    }

    fn touch(&mut self, db: i64, key: &[u8]) {
        self.clock += 1;
        let stamp = self.clock;
        self.versions.insert((db, key.to_vec()), stamp);
    }

    fn version(&self, db: i64, key: &[u8]) -> u64 {
        self.versions.get(&(db, key.to_vec())).copied().unwrap_or(0)
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
    password: Option<String>,
    connections: Mutex<Vec<TcpStream>>,
}

// =============================================================================
// Server Handle
// =============================================================================

/// A running fake store. Threads are left behind when it is dropped.
pub struct FakeStore {
    port: u16,
    shared: Arc<Shared>,
}

impl FakeStore {
    pub fn start() -> Self {
        Self::spawn(None)
    }

    /// Require AUTH with `password` before any other command
    pub fn with_password(password: &str) -> Self {
        Self::spawn(Some(password.to_string()))
    }

    fn spawn(password: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake store");
        let port = listener.local_addr().expect("local addr").port();
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
            password,
            connections: Mutex::new(Vec::new()),
        });

        let accept_shared = Arc::clone(&shared);
        thread::spawn(move || {
            for (id, stream) in listener.incoming().enumerate() {
                let Ok(stream) = stream else { continue };
                if let Ok(handle) = stream.try_clone() {
                    accept_shared.connections.lock().push(handle);
                }
                let shared = Arc::clone(&accept_shared);
                thread::spawn(move || serve_connection(shared, stream, id as u64));
            }
        });

        Self { port, shared }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Builder pointed at this store with a 5 s socket timeout
    pub fn config_builder(&self) -> ConfigBuilder {
        Config::builder()
            .host("127.0.0.1")
            .port(self.port)
            .timeout(Duration::from_secs(5))
    }

    pub fn config(&self) -> Config {
        self.config_builder().build()
    }

    pub fn client(&self) -> Client {
        Client::new(self.config())
    }

    /// Close every open connection from the server side
    pub fn drop_connections(&self) {
        for stream in self.shared.connections.lock().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Keywords of all commands received so far
    pub fn commands(&self) -> Vec<String> {
        self.shared.state.lock().log.clone()
    }

    /// How many times `keyword` was received
    pub fn count(&self, keyword: &str) -> usize {
        self.shared
            .state
            .lock()
            .log
            .iter()
            .filter(|k| k.as_str() == keyword)
            .count()
    }

    /// Contents of a list, left to right
    pub fn list(&self, db: i64, key: &str) -> Vec<Vec<u8>> {
        match self.shared.state.lock().db(db).get(key.as_bytes()) {
            Some(Entry::List(list)) => list.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Names of all keys in a keyspace, sorted
    pub fn keys(&self, db: i64) -> Vec<String> {
        let mut state = self.shared.state.lock();
        let mut keys: Vec<String> = state
            .db(db)
            .keys()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .collect();
        keys.sort();
        keys
    }

    /// Write a list directly, bypassing the protocol
    pub fn seed_list(&self, db: i64, key: &str, values: &[&[u8]]) {
        let mut state = self.shared.state.lock();
        let list = values.iter().map(|v| v.to_vec()).collect();
        state.db(db).insert(key.as_bytes().to_vec(), Entry::List(list));
        state.touch(db, key.as_bytes());
        drop(state);
        self.shared.changed.notify_all();
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

fn serve_connection(shared: Arc<Shared>, stream: TcpStream, id: u64) {
    let Ok(write_half) = stream.try_clone() else {
        return;
    };
    let writer: SharedWriter = Arc::new(Mutex::new(BufWriter::new(write_half)));
    let mut reader = BufReader::new(stream);

    let mut session = Session {
        id,
        authenticated: shared.password.is_none(),
        shared: Arc::clone(&shared),
        writer: Arc::clone(&writer),
        db: 0,
        queued: None,
        watched: Vec::new(),
    };

    while let Ok(Some(command)) = read_command(&mut reader) {
        let replies = session.handle(&command);
        let mut out = writer.lock();
        if replies.iter().any(|reply| write_reply(&mut *out, reply).is_err()) {
            break;
        }
    }

    shared.state.lock().listeners.remove(&id);
}

struct Session {
    id: u64,
    shared: Arc<Shared>,
    writer: SharedWriter,
    db: i64,
    authenticated: bool,
    queued: Option<Vec<Command>>,
    watched: Vec<(i64, Key, u64)>,
}

impl Session {
    fn handle(&mut self, command: &Command) -> Vec<Reply> {
        let name = command.keyword();
        self.shared.state.lock().log.push(name.clone());

        if !self.authenticated && name != "AUTH" {
            return vec![error("NOAUTH Authentication required.")];
        }

        if let Some(queue) = self.queued.as_mut() {
            if !matches!(name.as_str(), "EXEC" | "DISCARD" | "MULTI" | "WATCH") {
                queue.push(command.clone());
                return vec![Reply::Status("QUEUED".to_string())];
            }
        }

        let args = command.arguments();
        match name.as_str() {
            "AUTH" => vec![self.auth(args)],
            "SELECT" => match args.first().and_then(|a| parse_int(a)) {
                Some(db) if args.len() == 1 && db >= 0 => {
                    self.db = db;
                    vec![ok()]
                }
                _ => vec![error("ERR invalid DB index")],
            },
            "MULTI" => {
                if self.queued.is_some() {
                    return vec![error("ERR MULTI calls can not be nested")];
                }
                self.queued = Some(Vec::new());
                vec![ok()]
            }
            "DISCARD" => match self.queued.take() {
                Some(_) => {
                    self.watched.clear();
                    vec![ok()]
                }
                None => vec![error("ERR DISCARD without MULTI")],
            },
            "EXEC" => match self.queued.take() {
                Some(commands) => vec![self.exec(&commands)],
                None => vec![error("ERR EXEC without MULTI")],
            },
            "WATCH" => {
                if self.queued.is_some() {
                    return vec![error("ERR WATCH inside MULTI is not allowed")];
                }
                let state = self.shared.state.lock();
                for key in args {
                    self.watched.push((self.db, key.to_vec(), state.version(self.db, key)));
                }
                vec![ok()]
            }
            "UNWATCH" => {
                self.watched.clear();
                vec![ok()]
            }
            "SUBSCRIBE" => self.subscribe(args, false),
            "PSUBSCRIBE" => self.subscribe(args, true),
            "UNSUBSCRIBE" => self.unsubscribe(args, false),
            "PUNSUBSCRIBE" => self.unsubscribe(args, true),
            "BLPOP" | "BRPOP" | "BRPOPLPUSH" => vec![self.blocking(command)],
            _ => vec![self.run(command)],
        }
    }

    fn auth(&mut self, args: &[Bytes]) -> Reply {
        let Some(expected) = self.shared.password.as_deref() else {
            return error("ERR Client sent AUTH, but no password is set");
        };
        if args.len() == 1 && &args[0][..] == expected.as_bytes() {
            self.authenticated = true;
            ok()
        } else {
            error("ERR invalid password")
        }
    }

    fn run(&self, command: &Command) -> Reply {
        let mut state = self.shared.state.lock();
        let reply = apply(&mut state, self.db, command);
        self.finish(state);
        reply
    }

    fn exec(&mut self, commands: &[Command]) -> Reply {
        let watched = std::mem::take(&mut self.watched);
        let mut state = self.shared.state.lock();

        let conflict = watched
            .iter()
            .any(|(db, key, version)| state.version(*db, key) != *version);
        if conflict {
            return Reply::Nil;
        }

        let replies = commands
            .iter()
            .map(|command| apply(&mut state, self.db, command))
            .collect();
        self.finish(state);
        Reply::Array(replies)
    }

    /// Retry a pop until it yields or the command's timeout passes
    fn blocking(&self, command: &Command) -> Reply {
        let timeout = match command.arguments().last().and_then(|t| parse_int(t)) {
            Some(timeout) if timeout >= 0 => timeout,
            _ => return error("ERR timeout is not an integer or out of range"),
        };
        let deadline = (timeout > 0).then(|| Instant::now() + Duration::from_secs(timeout as u64));

        let mut state = self.shared.state.lock();
        loop {
            let reply = apply(&mut state, self.db, command);
            if !reply.is_nil() {
                self.finish(state);
                return reply;
            }
            match deadline {
                None => self.shared.changed.wait(&mut state),
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                        return Reply::Nil;
                    }
                }
            }
        }
    }

    /// Release the lock, wake blocked pops and deliver pub/sub messages
    fn finish(&self, mut state: parking_lot::MutexGuard<'_, State>) {
        let outbox = std::mem::take(&mut state.outbox);
        drop(state);
        self.shared.changed.notify_all();

        for (writer, message) in outbox {
            let _ = write_reply(&mut *writer.lock(), &message);
        }
    }

    fn subscribe(&mut self, targets: &[Bytes], pattern: bool) -> Vec<Reply> {
        let kind = if pattern { "psubscribe" } else { "subscribe" };
        let mut state = self.shared.state.lock();
        let listener = state.listeners.entry(self.id).or_insert_with(|| Listener {
            writer: Arc::clone(&self.writer),
            channels: BTreeSet::new(),
            patterns: BTreeSet::new(),
        });

        let mut replies = Vec::new();
        for target in targets {
            if pattern {
                listener.patterns.insert(target.to_vec());
            } else {
                listener.channels.insert(target.to_vec());
            }
            let count = listener.channels.len() + listener.patterns.len();
            replies.push(event(kind, Reply::Bulk(target.clone()), count));
        }
        replies
    }

    fn unsubscribe(&mut self, targets: &[Bytes], pattern: bool) -> Vec<Reply> {
        let kind = if pattern { "punsubscribe" } else { "unsubscribe" };
        let mut state = self.shared.state.lock();

        let Some(listener) = state.listeners.get_mut(&self.id) else {
            return vec![event(kind, Reply::Nil, 0)];
        };

        let targets: Vec<Key> = if targets.is_empty() {
            let current = if pattern { &listener.patterns } else { &listener.channels };
            current.iter().cloned().collect()
        } else {
            targets.iter().map(|t| t.to_vec()).collect()
        };

        let mut replies = Vec::new();
        for target in &targets {
            if pattern {
                listener.patterns.remove(target);
            } else {
                listener.channels.remove(target);
            }
            let count = listener.channels.len() + listener.patterns.len();
            replies.push(event(kind, Reply::Bulk(Bytes::from(target.clone())), count));
        }
        let remaining = listener.channels.len() + listener.patterns.len();
        if replies.is_empty() {
            replies.push(event(kind, Reply::Nil, remaining));
        }
        if remaining == 0 {
            state.listeners.remove(&self.id);
        }
        replies
    }
}

// =============================================================================
// Command Execution
// =============================================================================

/// Run one non-blocking command against the state
fn apply(state: &mut State, db: i64, command: &Command) -> Reply {
    let name = command.keyword();
    let args: Vec<&[u8]> = command.arguments().iter().map(|a| &a[..]).collect();

    match (name.as_str(), args.len()) {
        ("PING", 0) => Reply::Status("PONG".to_string()),
        ("PING", 1) => bulk(args[0]),
        ("FLUSHDB", _) => {
            let keys: Vec<Key> = state.db(db).keys().cloned().collect();
            for key in keys {
                state.touch(db, &key);
            }
            state.db(db).clear();
            ok()
        }

        ("GET", 1) => match state.db(db).get(args[0]) {
            None => Reply::Nil,
            Some(Entry::Str(value)) => bulk(value),
            Some(_) => wrong_type(),
        },
        ("SET", 2) => {
            state.db(db).insert(args[0].to_vec(), Entry::Str(args[1].to_vec()));
            state.touch(db, args[0]);
            ok()
        }
        ("INCR", 1) => incr_by(state, db, args[0], 1),
        ("INCRBY", 2) => match parse_int(args[1]) {
            Some(amount) => incr_by(state, db, args[0], amount),
            None => not_integer(),
        },
        ("DEL", n) if n >= 1 => {
            let mut removed = 0;
            for key in &args {
                if state.db(db).remove(*key).is_some() {
                    state.touch(db, key);
                    removed += 1;
                }
            }
            Reply::Integer(removed)
        }
        ("EXISTS", n) if n >= 1 => {
            let found = args.iter().filter(|key| state.db(db).contains_key(**key)).count();
            Reply::Integer(found as i64)
        }
        ("EXPIRE", 2) => Reply::Integer(state.db(db).contains_key(args[0]) as i64),

        ("LPUSH", n) if n >= 2 => push(state, db, args[0], &args[1..], true),
        ("RPUSH", n) if n >= 2 => push(state, db, args[0], &args[1..], false),
        ("LPOP", 1) | ("RPOP", 1) => match pop(state, db, args[0], name == "LPOP") {
            Ok(Some(value)) => bulk(&value),
            Ok(None) => Reply::Nil,
            Err(reply) => reply,
        },
        ("BLPOP", n) | ("BRPOP", n) if n >= 2 => {
            for key in &args[..n - 1] {
                match pop(state, db, key, name == "BLPOP") {
                    Ok(Some(value)) => return Reply::Array(vec![bulk(key), bulk(&value)]),
                    Ok(None) => {}
                    Err(reply) => return reply,
                }
            }
            Reply::Nil
        }
        ("RPOPLPUSH", 2) | ("BRPOPLPUSH", 3) => rpoplpush(state, db, args[0], args[1]),
        ("LLEN", 1) => match state.db(db).get(args[0]) {
            None => Reply::Integer(0),
            Some(Entry::List(list)) => Reply::Integer(list.len() as i64),
            Some(_) => wrong_type(),
        },
        ("LRANGE", 3) => {
            let (Some(start), Some(stop)) = (parse_int(args[1]), parse_int(args[2])) else {
                return not_integer();
            };
            match state.db(db).get(args[0]) {
                None => Reply::Array(Vec::new()),
                Some(Entry::List(list)) => Reply::Array(
                    range(list.len(), start, stop)
                        .map(|i| bulk(&list[i]))
                        .collect(),
                ),
                Some(_) => wrong_type(),
            }
        }

        ("HGET", 2) => match state.db(db).get(args[0]) {
            None => Reply::Nil,
            Some(Entry::Hash(hash)) => hash.get(args[1]).map_or(Reply::Nil, |v| bulk(v)),
            Some(_) => wrong_type(),
        },
        ("HSET", n) if n >= 3 && n % 2 == 1 => {
            let added = match state
                .db(db)
                .entry(args[0].to_vec())
                .or_insert_with(|| Entry::Hash(BTreeMap::new()))
            {
                Entry::Hash(hash) => args[1..]
                    .chunks(2)
                    .filter(|pair| hash.insert(pair[0].to_vec(), pair[1].to_vec()).is_none())
                    .count(),
                _ => return wrong_type(),
            };
            state.touch(db, args[0]);
            Reply::Integer(added as i64)
        }
        ("HDEL", n) if n >= 2 => {
            let (removed, empty) = match state.db(db).get_mut(args[0]) {
                None => (0, false),
                Some(Entry::Hash(hash)) => {
                    let removed = args[1..].iter().filter(|f| hash.remove(**f).is_some()).count();
                    (removed, hash.is_empty())
                }
                Some(_) => return wrong_type(),
            };
            if empty {
                state.db(db).remove(args[0]);
            }
            if removed > 0 {
                state.touch(db, args[0]);
            }
            Reply::Integer(removed as i64)
        }
        ("HKEYS", 1) | ("HVALS", 1) | ("HGETALL", 1) => match state.db(db).get(args[0]) {
            None => Reply::Array(Vec::new()),
            Some(Entry::Hash(hash)) => Reply::Array(match name.as_str() {
                "HKEYS" => hash.keys().map(|k| bulk(k)).collect(),
                "HVALS" => hash.values().map(|v| bulk(v)).collect(),
                _ => hash.iter().flat_map(|(k, v)| [bulk(k), bulk(v)]).collect(),
            }),
            Some(_) => wrong_type(),
        },

        ("PUBLISH", 2) => publish(state, args[0], args[1]),

        (known, _) if KNOWN_COMMANDS.contains(&known) => error(&format!(
            "ERR wrong number of arguments for '{}' command",
            known.to_ascii_lowercase()
        )),
        (unknown, _) => error(&format!("ERR unknown command '{}'", unknown)),
    }
}

const KNOWN_COMMANDS: &[&str] = &[
    "PING", "FLUSHDB", "GET", "SET", "INCR", "INCRBY", "DEL", "EXISTS", "EXPIRE", "LPUSH",
    "RPUSH", "LPOP", "RPOP", "BLPOP", "BRPOP", "RPOPLPUSH", "BRPOPLPUSH", "LLEN", "LRANGE",
    "HGET", "HSET", "HDEL", "HKEYS", "HVALS", "HGETALL", "PUBLISH",
];

fn incr_by(state: &mut State, db: i64, key: &[u8], amount: i64) -> Reply {
    let current = match state.db(db).get(key) {
        None => 0,
        Some(Entry::Str(raw)) => match parse_int(raw) {
            Some(n) => n,
            None => return not_integer(),
        },
        Some(_) => return wrong_type(),
    };
    let next = current + amount;
    state
        .db(db)
        .insert(key.to_vec(), Entry::Str(next.to_string().into_bytes()));
    state.touch(db, key);
    Reply::Integer(next)
}

fn push(state: &mut State, db: i64, key: &[u8], values: &[&[u8]], left: bool) -> Reply {
    let len = match state
        .db(db)
        .entry(key.to_vec())
        .or_insert_with(|| Entry::List(VecDeque::new()))
    {
        Entry::List(list) => {
            for value in values {
                if left {
                    list.push_front(value.to_vec());
                } else {
                    list.push_back(value.to_vec());
                }
            }
            list.len()
        }
        _ => return wrong_type(),
    };
    state.touch(db, key);
    Reply::Integer(len as i64)
}

fn pop(state: &mut State, db: i64, key: &[u8], left: bool) -> Result<Option<Vec<u8>>, Reply> {
    let (value, empty) = match state.db(db).get_mut(key) {
        None => return Ok(None),
        Some(Entry::List(list)) => {
            let value = if left { list.pop_front() } else { list.pop_back() };
            (value, list.is_empty())
        }
        Some(_) => return Err(wrong_type()),
    };
    if empty {
        state.db(db).remove(key);
    }
    if value.is_some() {
        state.touch(db, key);
    }
    Ok(value)
}

fn rpoplpush(state: &mut State, db: i64, source: &[u8], destination: &[u8]) -> Reply {
    if let Some(entry) = state.db(db).get(destination) {
        if !matches!(entry, Entry::List(_)) {
            return wrong_type();
        }
    }
    match pop(state, db, source, false) {
        Ok(Some(value)) => {
            push(state, db, destination, &[&value[..]], true);
            bulk(&value)
        }
        Ok(None) => Reply::Nil,
        Err(reply) => reply,
    }
}

fn publish(state: &mut State, channel: &[u8], payload: &[u8]) -> Reply {
    let mut deliveries = Vec::new();
    for listener in state.listeners.values() {
        if listener.channels.contains(channel) {
            let message = Reply::Array(vec![bulk(b"message"), bulk(channel), bulk(payload)]);
            deliveries.push((Arc::clone(&listener.writer), message));
        }
        for pattern in &listener.patterns {
            if glob_match(pattern, channel) {
                let message = Reply::Array(vec![
                    bulk(b"pmessage"),
                    bulk(pattern),
                    bulk(channel),
                    bulk(payload),
                ]);
                deliveries.push((Arc::clone(&listener.writer), message));
            }
        }
    }
    let receivers = deliveries.len() as i64;
    state.outbox.extend(deliveries);
    Reply::Integer(receivers)
}

// =============================================================================
// Helpers
// =============================================================================

fn range(len: usize, start: i64, stop: i64) -> std::ops::Range<usize> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return 0..0;
    }
    start as usize..stop as usize + 1
}

/// Glob match supporting `*` and `?`
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

fn event(kind: &str, target: Reply, count: usize) -> Reply {
    Reply::Array(vec![bulk(kind.as_bytes()), target, Reply::Integer(count as i64)])
}

fn parse_int(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

fn bulk(value: &[u8]) -> Reply {
    Reply::Bulk(Bytes::copy_from_slice(value))
}

fn ok() -> Reply {
    Reply::Status("OK".to_string())
}

fn error(message: &str) -> Reply {
    Reply::Error(message.to_string())
}

fn wrong_type() -> Reply {
    error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn not_integer() -> Reply {
    error("ERR value is not an integer or out of range")
}
