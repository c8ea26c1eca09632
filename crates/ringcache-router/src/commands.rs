//! Static command eligibility table.
//!
//! Each entry maps a command's function name (lowercase, spaces folded to
//! underscores, `DEL` spelled `delete`) to the name of its first declared
//! parameter. The router only uses this to decide whether the second part
//! of a command is a key; it never interprets the command otherwise.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::RoutingError;

/// First-parameter names that identify a key.
pub const KEY_PARAMETERS: &[&str] = &["key", "keys", "name", "names", "src"];

/// Commands routed on their first argument although it is not named as a key.
pub const ROUTABLE_WITHOUT_KEY: &[&str] = &["touch"];

/// Commands never routed, whatever their signature.
pub const EXCLUDED: &[&str] = &["config_set"];

/// `(function name, first parameter)`; `None` for commands taking no arguments.
const COMMANDS: &[(&str, Option<&str>)] = &[
    // Strings
    ("append", Some("key")),
    ("bitcount", Some("key")),
    ("bitfield", Some("key")),
    ("bitop", Some("operation")),
    ("bitpos", Some("key")),
    ("decr", Some("name")),
    ("decrby", Some("name")),
    ("get", Some("name")),
    ("getbit", Some("name")),
    ("getrange", Some("key")),
    ("getset", Some("name")),
    ("incr", Some("name")),
    ("incrby", Some("name")),
    ("incrbyfloat", Some("name")),
    ("mget", Some("keys")),
    ("mset", Some("mapping")),
    ("msetnx", Some("mapping")),
    ("psetex", Some("name")),
    ("set", Some("name")),
    ("setbit", Some("name")),
    ("setex", Some("name")),
    ("setnx", Some("name")),
    ("setrange", Some("name")),
    ("strlen", Some("name")),
    ("substr", Some("name")),
    // Keys
    ("delete", Some("names")),
    ("dump", Some("name")),
    ("exists", Some("names")),
    ("expire", Some("name")),
    ("expireat", Some("name")),
    ("keys", Some("pattern")),
    ("move", Some("name")),
    ("persist", Some("name")),
    ("pexpire", Some("name")),
    ("pexpireat", Some("name")),
    ("pttl", Some("name")),
    ("randomkey", None),
    ("rename", Some("src")),
    ("renamenx", Some("src")),
    ("restore", Some("name")),
    ("scan", Some("cursor")),
    ("sort", Some("name")),
    ("touch", Some("args")),
    ("ttl", Some("name")),
    ("type", Some("name")),
    ("unlink", Some("names")),
    ("watch", Some("names")),
    ("unwatch", None),
    ("object", Some("infotype")),
    ("memory_usage", Some("key")),
    ("debug_object", Some("key")),
    // Lists
    ("blpop", Some("keys")),
    ("brpop", Some("keys")),
    ("brpoplpush", Some("src")),
    ("lindex", Some("name")),
    ("linsert", Some("name")),
    ("llen", Some("name")),
    ("lpop", Some("name")),
    ("lpush", Some("name")),
    ("lpushx", Some("name")),
    ("lrange", Some("name")),
    ("lrem", Some("name")),
    ("lset", Some("name")),
    ("ltrim", Some("name")),
    ("rpop", Some("name")),
    ("rpoplpush", Some("src")),
    ("rpush", Some("name")),
    ("rpushx", Some("name")),
    // Sets
    ("sadd", Some("name")),
    ("scard", Some("name")),
    ("sdiff", Some("keys")),
    ("sdiffstore", Some("dest")),
    ("sinter", Some("keys")),
    ("sinterstore", Some("dest")),
    ("sismember", Some("name")),
    ("smembers", Some("name")),
    ("smove", Some("src")),
    ("spop", Some("name")),
    ("srandmember", Some("name")),
    ("srem", Some("name")),
    ("sscan", Some("name")),
    ("sunion", Some("keys")),
    ("sunionstore", Some("dest")),
    // Sorted sets
    ("bzpopmax", Some("keys")),
    ("bzpopmin", Some("keys")),
    ("zadd", Some("name")),
    ("zcard", Some("name")),
    ("zcount", Some("name")),
    ("zincrby", Some("name")),
    ("zinterstore", Some("dest")),
    ("zlexcount", Some("name")),
    ("zpopmax", Some("name")),
    ("zpopmin", Some("name")),
    ("zrange", Some("name")),
    ("zrangebylex", Some("name")),
    ("zrangebyscore", Some("name")),
    ("zrank", Some("name")),
    ("zrem", Some("name")),
    ("zremrangebylex", Some("name")),
    ("zremrangebyrank", Some("name")),
    ("zremrangebyscore", Some("name")),
    ("zrevrange", Some("name")),
    ("zrevrangebylex", Some("name")),
    ("zrevrangebyscore", Some("name")),
    ("zrevrank", Some("name")),
    ("zscan", Some("name")),
    ("zscore", Some("name")),
    ("zunionstore", Some("dest")),
    // Hashes
    ("hdel", Some("name")),
    ("hexists", Some("name")),
    ("hget", Some("name")),
    ("hgetall", Some("name")),
    ("hincrby", Some("name")),
    ("hincrbyfloat", Some("name")),
    ("hkeys", Some("name")),
    ("hlen", Some("name")),
    ("hmget", Some("name")),
    ("hmset", Some("name")),
    ("hscan", Some("name")),
    ("hset", Some("name")),
    ("hsetnx", Some("name")),
    ("hstrlen", Some("name")),
    ("hvals", Some("name")),
    // HyperLogLog
    ("pfadd", Some("name")),
    ("pfcount", Some("sources")),
    ("pfmerge", Some("dest")),
    // Geo
    ("geoadd", Some("name")),
    ("geodist", Some("name")),
    ("geohash", Some("name")),
    ("geopos", Some("name")),
    ("georadius", Some("name")),
    ("georadiusbymember", Some("name")),
    // Streams
    ("xack", Some("name")),
    ("xadd", Some("name")),
    ("xclaim", Some("name")),
    ("xdel", Some("name")),
    ("xlen", Some("name")),
    ("xpending", Some("name")),
    ("xrange", Some("name")),
    ("xread", Some("streams")),
    ("xrevrange", Some("name")),
    ("xtrim", Some("name")),
    // Scripting and pub/sub
    ("eval", Some("script")),
    ("evalsha", Some("sha")),
    ("publish", Some("channel")),
    // Server
    ("bgrewriteaof", None),
    ("bgsave", None),
    ("client_id", None),
    ("client_kill", Some("address")),
    ("client_list", Some("_type")),
    ("config_get", Some("pattern")),
    ("config_resetstat", None),
    ("config_rewrite", None),
    ("config_set", Some("name")),
    ("dbsize", None),
    ("echo", Some("value")),
    ("flushall", Some("asynchronous")),
    ("flushdb", Some("asynchronous")),
    ("info", Some("section")),
    ("lastsave", None),
    ("ping", None),
    ("save", None),
    ("slowlog_get", Some("num")),
    ("time", None),
];

static TABLE: LazyLock<HashMap<&'static str, Option<&'static str>>> =
    LazyLock::new(|| COMMANDS.iter().copied().collect());

/// Normalize a command name to its table key.
///
/// `ACL LOAD` becomes `acl_load`, `SET` becomes `set`, and `DEL` becomes
/// `delete`.
pub fn command_function_name(command: &str) -> String {
    if command.trim().eq_ignore_ascii_case("del") {
        return "delete".to_string();
    }
    command
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_ascii_lowercase()
}

/// Declared first parameter of `command`, or `None` if it takes none.
pub fn first_parameter(command: &str) -> Result<Option<&'static str>, RoutingError> {
    TABLE
        .get(command_function_name(command).as_str())
        .copied()
        .ok_or_else(|| RoutingError::UnknownCommand(command.to_string()))
}

/// Check that `command` may be routed on its first argument.
pub fn check_routable(command: &str) -> Result<(), RoutingError> {
    let function = command_function_name(command);
    let first = first_parameter(command)?;

    let is_key = first.is_some_and(|p| KEY_PARAMETERS.contains(&p));
    if !is_key && !ROUTABLE_WITHOUT_KEY.contains(&function.as_str()) {
        return Err(RoutingError::Unroutable {
            command: command.to_string(),
            parameter: first.unwrap_or("-").to_string(),
        });
    }
    if EXCLUDED.contains(&function.as_str()) {
        return Err(RoutingError::Excluded(command.to_string()));
    }
    Ok(())
}
