//! In-memory store nodes for tests and local development.
//!
//! [`MemoryNode`] executes the subset of the store protocol the cache uses
//! (strings with expiry, hashes, key enumeration) against a `HashMap`.
//! Expiry follows the tokio clock, so tests can drive it with
//! `tokio::time::pause`/`advance`.
//!
//! Nodes can be taken down or told to fail their next commands with a
//! [`Fault`], which lets tests exercise retry and reconnect paths without
//! real sockets.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use ringcache_types::NodeUrl;
use tokio::time::Instant;

use crate::command::{Command, Reply};
use crate::connection::{Connection, Connector};
use crate::error::StoreError;

/// Duration reported by simulated timeouts.
const SIMULATED_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure injected into the next command sent to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The connection drops before a reply arrives.
    Disconnect,
    /// The node does not answer in time.
    Timeout,
}

enum Value {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|t| t > now)
    }
}

#[derive(Default)]
struct NodeState {
    data: HashMap<Bytes, Entry>,
    faults: VecDeque<Fault>,
    down: bool,
}

impl NodeState {
    /// Drop the entry for `key` if it has expired, then return it.
    fn entry(&mut self, key: &Bytes, now: Instant) -> Option<&mut Entry> {
        if self.data.get(key).is_some_and(|e| !e.live(now)) {
            self.data.remove(key);
        }
        self.data.get_mut(key)
    }
}

/// A single in-memory store node.
pub struct MemoryNode {
    url: NodeUrl,
    state: Mutex<NodeState>,
    commands: AtomicU64,
}

impl MemoryNode {
    /// Create an empty node identified by `url`.
    pub fn new(url: NodeUrl) -> Self {
        Self {
            url,
            state: Mutex::new(NodeState::default()),
            commands: AtomicU64::new(0),
        }
    }

    /// This node's address.
    pub fn url(&self) -> &NodeUrl {
        &self.url
    }

    /// Take the node down (every command fails with a connection error) or
    /// bring it back up.
    pub fn set_down(&self, down: bool) {
        self.state.lock().expect("lock poisoned").down = down;
    }

    /// Fail the next `n` commands with `fault`.
    pub fn fail_next(&self, n: usize, fault: Fault) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.faults.extend(std::iter::repeat_n(fault, n));
    }

    /// Number of commands that reached the node (faulted ones excluded).
    pub fn command_count(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock().expect("lock poisoned");
        state.data.values().filter(|e| e.live(now)).count()
    }

    /// Whether the node holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is present and live.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        let state = self.state.lock().expect("lock poisoned");
        state
            .data
            .get(key.as_bytes())
            .is_some_and(|e| e.live(now))
    }

    /// Every live key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let state = self.state.lock().expect("lock poisoned");
        let mut keys: Vec<String> = state
            .data
            .iter()
            .filter(|(_, e)| e.live(now))
            .map(|(k, _)| String::from_utf8_lossy(k).into_owned())
            .collect();
        keys.sort();
        keys
    }

    /// Consume an injected fault, if any, before a command is delivered.
    fn admit(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.down {
            return Err(StoreError::Connection(format!("{}: node down", self.url.socket_addr())));
        }
        match state.faults.pop_front() {
            None => Ok(()),
            Some(Fault::Disconnect) => Err(StoreError::Connection(format!(
                "{}: connection reset",
                self.url.socket_addr()
            ))),
            Some(Fault::Timeout) => Err(StoreError::Timeout(SIMULATED_TIMEOUT)),
        }
    }

    /// Execute one command and produce its reply.
    pub fn execute(&self, cmd: &Command) -> Reply {
        self.commands.fetch_add(1, Ordering::Relaxed);
        let Some(name) = cmd.name() else {
            return Reply::Error("ERR invalid command name".into());
        };
        let name = name.to_ascii_uppercase();
        let args = &cmd.parts()[1..];
        let now = Instant::now();
        let mut state = self.state.lock().expect("lock poisoned");

        match (name.as_str(), args.len()) {
            ("PING", 0) => Reply::Status("PONG".into()),
            ("PING" | "ECHO", 1) => Reply::Bulk(args[0].clone()),
            ("SELECT", 1) | ("AUTH", 1 | 2) => Reply::Status("OK".into()),

            ("GET", 1) => match state.entry(&args[0], now) {
                None => Reply::Nil,
                Some(Entry { value: Value::Str(v), .. }) => Reply::Bulk(v.clone()),
                Some(_) => wrong_type(),
            },
            ("SET", n) if n >= 2 => set(&mut state, args, now),
            ("SETEX", 3) => match parse_i64(&args[1]) {
                Some(secs) if secs > 0 => {
                    put_str(&mut state, &args[0], args[2].clone(), Some(now + Duration::from_secs(secs as u64)));
                    Reply::Status("OK".into())
                }
                _ => Reply::Error("ERR invalid expire time in 'setex' command".into()),
            },
            ("SETNX", 2) => {
                if state.entry(&args[0], now).is_some() {
                    Reply::Int(0)
                } else {
                    put_str(&mut state, &args[0], args[1].clone(), None);
                    Reply::Int(1)
                }
            }
            ("GETSET", 2) => {
                let old = match state.entry(&args[0], now) {
                    None => Reply::Nil,
                    Some(Entry { value: Value::Str(v), .. }) => Reply::Bulk(v.clone()),
                    Some(_) => return wrong_type(),
                };
                put_str(&mut state, &args[0], args[1].clone(), None);
                old
            }
            ("APPEND", 2) => match state.entry(&args[0], now) {
                Some(Entry { value: Value::Str(v), .. }) => {
                    let mut joined = v.to_vec();
                    joined.extend_from_slice(&args[1]);
                    let len = joined.len();
                    *v = Bytes::from(joined);
                    Reply::Int(len as i64)
                }
                Some(_) => wrong_type(),
                None => {
                    put_str(&mut state, &args[0], args[1].clone(), None);
                    Reply::Int(args[1].len() as i64)
                }
            },
            ("STRLEN", 1) => match state.entry(&args[0], now) {
                None => Reply::Int(0),
                Some(Entry { value: Value::Str(v), .. }) => Reply::Int(v.len() as i64),
                Some(_) => wrong_type(),
            },
            ("INCR", 1) => incr_by(&mut state, &args[0], 1, now),
            ("DECR", 1) => incr_by(&mut state, &args[0], -1, now),
            ("INCRBY" | "DECRBY", 2) => match parse_i64(&args[1]) {
                Some(delta) => {
                    let delta = if name == "DECRBY" { -delta } else { delta };
                    incr_by(&mut state, &args[0], delta, now)
                }
                None => not_an_integer(),
            },

            ("DEL", n) if n >= 1 => {
                let mut removed = 0;
                for key in args {
                    if state.entry(key, now).is_some() {
                        state.data.remove(key);
                        removed += 1;
                    }
                }
                Reply::Int(removed)
            }
            ("EXISTS" | "TOUCH", n) if n >= 1 => {
                let count = args
                    .iter()
                    .filter(|key| state.entry(key, now).is_some())
                    .count();
                Reply::Int(count as i64)
            }
            ("EXPIRE", 2) => {
                let Some(secs) = parse_i64(&args[1]) else {
                    return not_an_integer();
                };
                if secs <= 0 {
                    let existed = state.entry(&args[0], now).is_some();
                    state.data.remove(&args[0]);
                    return Reply::Int(i64::from(existed));
                }
                match state.entry(&args[0], now) {
                    Some(entry) => {
                        entry.expires_at = Some(now + Duration::from_secs(secs as u64));
                        Reply::Int(1)
                    }
                    None => Reply::Int(0),
                }
            }
            ("PERSIST", 1) => match state.entry(&args[0], now) {
                Some(entry) if entry.expires_at.is_some() => {
                    entry.expires_at = None;
                    Reply::Int(1)
                }
                _ => Reply::Int(0),
            },
            ("TTL", 1) => match state.entry(&args[0], now) {
                None => Reply::Int(-2),
                Some(Entry { expires_at: None, .. }) => Reply::Int(-1),
                Some(Entry { expires_at: Some(t), .. }) => {
                    let remaining = t.saturating_duration_since(now);
                    Reply::Int(((remaining.as_millis() + 500) / 1000) as i64)
                }
            },
            ("TYPE", 1) => match state.entry(&args[0], now) {
                None => Reply::Status("none".into()),
                Some(Entry { value: Value::Str(_), .. }) => Reply::Status("string".into()),
                Some(Entry { value: Value::Hash(_), .. }) => Reply::Status("hash".into()),
            },
            ("KEYS", 1) => {
                let pattern = args[0].clone();
                let mut keys: Vec<Bytes> = state
                    .data
                    .iter()
                    .filter(|(k, e)| e.live(now) && glob_match(&pattern, k))
                    .map(|(k, _)| k.clone())
                    .collect();
                keys.sort();
                Reply::Array(keys.into_iter().map(Reply::Bulk).collect())
            }
            ("DBSIZE", 0) => {
                Reply::Int(state.data.values().filter(|e| e.live(now)).count() as i64)
            }
            ("FLUSHDB" | "FLUSHALL", _) => {
                state.data.clear();
                Reply::Status("OK".into())
            }

            ("HSET" | "HMSET", n) if n >= 3 && n % 2 == 1 => {
                if state.entry(&args[0], now).is_none() {
                    state.data.insert(
                        args[0].clone(),
                        Entry {
                            value: Value::Hash(HashMap::new()),
                            expires_at: None,
                        },
                    );
                }
                let hash = match hash_entry(&mut state, &args[0], now) {
                    Ok(Some(hash)) => hash,
                    Ok(None) => return Reply::Nil,
                    Err(reply) => return reply,
                };
                let mut added = 0;
                for pair in args[1..].chunks(2) {
                    if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
                        added += 1;
                    }
                }
                if name == "HMSET" {
                    Reply::Status("OK".into())
                } else {
                    Reply::Int(added)
                }
            }
            ("HGET", 2) => match hash_entry(&mut state, &args[0], now) {
                Ok(Some(hash)) => hash.get(&args[1]).cloned().map_or(Reply::Nil, Reply::Bulk),
                Ok(None) => Reply::Nil,
                Err(reply) => reply,
            },
            ("HGETALL", 1) => match hash_entry(&mut state, &args[0], now) {
                Ok(Some(hash)) => {
                    let mut pairs: Vec<(&Bytes, &Bytes)> = hash.iter().collect();
                    pairs.sort();
                    Reply::Array(
                        pairs
                            .into_iter()
                            .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                            .collect(),
                    )
                }
                Ok(None) => Reply::Array(Vec::new()),
                Err(reply) => reply,
            },
            ("HDEL", n) if n >= 2 => {
                let (removed, now_empty) = match hash_entry(&mut state, &args[0], now) {
                    Ok(Some(hash)) => {
                        let removed = args[1..].iter().filter(|f| hash.remove(*f).is_some()).count();
                        (removed, hash.is_empty())
                    }
                    Ok(None) => (0, false),
                    Err(reply) => return reply,
                };
                if now_empty {
                    state.data.remove(&args[0]);
                }
                Reply::Int(removed as i64)
            }
            ("HLEN", 1) => match hash_entry(&mut state, &args[0], now) {
                Ok(Some(hash)) => Reply::Int(hash.len() as i64),
                Ok(None) => Reply::Int(0),
                Err(reply) => reply,
            },
            ("HEXISTS", 2) => match hash_entry(&mut state, &args[0], now) {
                Ok(Some(hash)) => Reply::Int(i64::from(hash.contains_key(&args[1]))),
                Ok(None) => Reply::Int(0),
                Err(reply) => reply,
            },

            _ => Reply::Error(format!(
                "ERR unknown command or wrong number of arguments for '{}'",
                name.to_ascii_lowercase()
            )),
        }
    }
}

impl std::fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNode").field("url", &self.url).finish()
    }
}

fn set(state: &mut NodeState, args: &[Bytes], now: Instant) -> Reply {
    let mut expires_at = None;
    let mut nx = false;
    let mut xx = false;
    let mut i = 2;
    while i < args.len() {
        let opt = String::from_utf8_lossy(&args[i]).to_ascii_uppercase();
        match opt.as_str() {
            "NX" => nx = true,
            "XX" => xx = true,
            "EX" | "PX" => {
                let Some(n) = args.get(i + 1).and_then(|a| parse_i64(a)).filter(|n| *n > 0) else {
                    return Reply::Error("ERR invalid expire time in 'set' command".into());
                };
                let ttl = if opt == "EX" {
                    Duration::from_secs(n as u64)
                } else {
                    Duration::from_millis(n as u64)
                };
                expires_at = Some(now + ttl);
                i += 1;
            }
            _ => return Reply::Error("ERR syntax error".into()),
        }
        i += 1;
    }

    let exists = state.entry(&args[0], now).is_some();
    if (nx && exists) || (xx && !exists) {
        return Reply::Nil;
    }
    put_str(state, &args[0], args[1].clone(), expires_at);
    Reply::Status("OK".into())
}

fn put_str(state: &mut NodeState, key: &Bytes, value: Bytes, expires_at: Option<Instant>) {
    state.data.insert(
        key.clone(),
        Entry {
            value: Value::Str(value),
            expires_at,
        },
    );
}

fn incr_by(state: &mut NodeState, key: &Bytes, delta: i64, now: Instant) -> Reply {
    let current = match state.entry(key, now) {
        None => 0,
        Some(Entry { value: Value::Str(v), .. }) => match parse_i64(v) {
            Some(n) => n,
            None => return not_an_integer(),
        },
        Some(_) => return wrong_type(),
    };
    let Some(next) = current.checked_add(delta) else {
        return Reply::Error("ERR increment or decrement would overflow".into());
    };
    let value = Bytes::from(next.to_string());
    match state.data.get_mut(key) {
        Some(entry) => entry.value = Value::Str(value),
        None => put_str(state, key, value, None),
    }
    Reply::Int(next)
}

fn hash_entry<'a>(
    state: &'a mut NodeState,
    key: &Bytes,
    now: Instant,
) -> Result<Option<&'a mut HashMap<Bytes, Bytes>>, Reply> {
    match state.entry(key, now) {
        Some(Entry { value: Value::Hash(hash), .. }) => Ok(Some(hash)),
        Some(_) => Err(wrong_type()),
        None => Ok(None),
    }
}

fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

fn wrong_type() -> Reply {
    Reply::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into())
}

fn not_an_integer() -> Reply {
    Reply::Error("ERR value is not an integer or out of range".into())
}

/// Glob matching as used by `KEYS`: `*`, `?`, `[set]`, `[^set]`, `[a-z]`
/// and `\` escapes.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next_p)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next_p;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == b'[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p + 1;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match `c` against the class starting at `pattern[start] == b'['`.
/// Returns `(matched, index after ']')`, or `None` if the class is unterminated.
fn match_class(pattern: &[u8], start: usize, c: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }
    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// A connection to a [`MemoryNode`].
pub struct MemoryConnection {
    node: Option<Arc<MemoryNode>>,
    addr: String,
    pending: VecDeque<Reply>,
    retry_on_timeout: bool,
}

#[async_trait::async_trait]
impl Connection for MemoryConnection {
    async fn send_command(&mut self, cmd: &Command) -> Result<(), StoreError> {
        let Some(node) = &self.node else {
            return Err(StoreError::Connection(format!("{}: connection refused", self.addr)));
        };
        node.admit()?;
        let reply = node.execute(cmd);
        self.pending.push_back(reply);
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply, StoreError> {
        self.pending
            .pop_front()
            .ok_or_else(|| StoreError::Connection(format!("{}: no reply pending", self.addr)))
    }

    async fn disconnect(&mut self) {
        self.pending.clear();
    }

    fn retry_on_timeout(&self) -> bool {
        self.retry_on_timeout
    }
}

/// Connector resolving node addresses to registered [`MemoryNode`]s.
///
/// Connections to unregistered addresses fail like refused TCP connects.
#[derive(Default)]
pub struct MemoryConnector {
    nodes: Mutex<HashMap<NodeUrl, Arc<MemoryNode>>>,
    retry_on_timeout: bool,
}

impl MemoryConnector {
    /// Connector with no nodes registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow connections to resend once after a timeout.
    pub fn with_retry_on_timeout(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    /// Register a node at `url`, or return the existing one.
    pub fn add_node(&self, url: NodeUrl) -> Arc<MemoryNode> {
        let mut nodes = self.nodes.lock().expect("lock poisoned");
        nodes
            .entry(url.clone())
            .or_insert_with(|| Arc::new(MemoryNode::new(url)))
            .clone()
    }

    /// Unregister the node at `url`.
    pub fn remove_node(&self, url: &NodeUrl) -> Option<Arc<MemoryNode>> {
        self.nodes.lock().expect("lock poisoned").remove(url)
    }

    /// The node at `url`, if registered.
    pub fn node(&self, url: &NodeUrl) -> Option<Arc<MemoryNode>> {
        self.nodes.lock().expect("lock poisoned").get(url).cloned()
    }

    /// Every registered node.
    pub fn nodes(&self) -> Vec<Arc<MemoryNode>> {
        let mut nodes: Vec<_> = self.nodes.lock().expect("lock poisoned").values().cloned().collect();
        nodes.sort_by(|a, b| a.url().cmp(b.url()));
        nodes
    }
}

impl Connector for MemoryConnector {
    fn open(&self, url: &NodeUrl) -> Result<Box<dyn Connection>, StoreError> {
        Ok(Box::new(MemoryConnection {
            node: self.node(url),
            addr: url.socket_addr(),
            pending: VecDeque::new(),
            retry_on_timeout: self.retry_on_timeout,
        }))
    }
}
