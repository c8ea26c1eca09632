//! `ringcachectl`: operator CLI for a ringcache cluster.
//!
//! Administers the ring record in the control store and runs commands
//! through the same routing the cache client uses.
//!
//! # Usage
//!
//! ```text
//! ringcachectl -c ringcache.toml ring show          # nodes and vnode counts
//! ringcachectl ring add redis://10.0.0.7:6379/0     # add a node
//! ringcachectl ring remove redis://10.0.0.7:6379/0  # drop a node
//! ringcachectl locate user:42                       # node owning a key
//! ringcachectl exec HGETALL user:42                 # routed command
//! ringcachectl set --prefix greeting hello -t 60    # cache client writes
//! ringcachectl clear --prefix --yes                 # delete every prefixed key
//! ```

mod config;
mod telemetry;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ringcache_cache::{Decoded, ShardedCache};
use ringcache_placement::RingResolver;
use ringcache_router::CommandRouter;
use ringcache_store::{Command, Reply};
use ringcache_types::NodeUrl;
use tracing::{debug, info_span};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "ringcachectl",
    version,
    about = "Administer and query a ringcache cluster"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change the ring stored in the control store.
    Ring {
        #[command(subcommand)]
        action: RingCommands,
    },

    /// Print the node owning a key.
    Locate {
        /// Routing key.
        key: String,

        /// Prepend the configured cache key prefix.
        #[arg(short, long)]
        prefix: bool,
    },

    /// Run a single command on the node owning its key.
    Exec {
        /// Command name (e.g. `GET`, `HSET`).
        command: String,

        /// Command arguments; the first one is the routing key.
        args: Vec<String>,
    },

    /// Read a cached value.
    Get {
        key: String,

        /// Prepend the configured cache key prefix.
        #[arg(short, long)]
        prefix: bool,
    },

    /// Store a value. Integers are stored as integers, anything else as text.
    Set {
        key: String,
        value: String,

        /// Lifetime in seconds; `0` or less never expires.
        #[arg(short, long, allow_negative_numbers = true)]
        timeout: Option<i64>,

        /// Prepend the configured cache key prefix.
        #[arg(short, long)]
        prefix: bool,
    },

    /// Delete a cached value.
    Del {
        key: String,

        /// Prepend the configured cache key prefix.
        #[arg(short, long)]
        prefix: bool,
    },

    /// Delete every key on every node (or every prefixed key).
    Clear {
        /// Only delete keys under the configured cache key prefix.
        #[arg(short, long)]
        prefix: bool,

        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum RingCommands {
    /// Show the nodes of the stored ring.
    Show,

    /// Add a node to the stored ring.
    Add {
        /// Node URL (`redis://[:password@]host:port/db`).
        url: NodeUrl,

        /// Virtual nodes to place for it (defaults to `[ring] vnodes`).
        #[arg(short, long)]
        vnodes: Option<u32>,
    },

    /// Remove a node from the stored ring.
    Remove {
        /// Node URL as stored in the ring.
        url: NodeUrl,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log.level);
    debug!(control = ?config.control.url(), "loaded config");

    match cli.command {
        Commands::Ring { action } => {
            let router = connect_router(&config);
            match action {
                RingCommands::Show => cmd_ring_show(router.resolver()).await,
                RingCommands::Add { url, vnodes } => {
                    let vnodes = vnodes.unwrap_or_else(|| config.vnodes());
                    cmd_ring_add(router.resolver(), &url, vnodes).await
                }
                RingCommands::Remove { url } => cmd_ring_remove(router.resolver(), &url).await,
            }
        }
        Commands::Locate { key, prefix } => {
            let key = if prefix {
                format!("{}{key}", config.cache.key_prefix)
            } else {
                key
            };
            cmd_locate(&connect_router(&config), &key).await
        }
        Commands::Exec { command, args } => {
            cmd_exec(&connect_router(&config), &command, &args).await
        }
        Commands::Get { key, prefix } => cmd_get(&connect_cache(&config).await?, &key, prefix).await,
        Commands::Set {
            key,
            value,
            timeout,
            prefix,
        } => cmd_set(&connect_cache(&config).await?, &key, &value, timeout, prefix).await,
        Commands::Del { key, prefix } => cmd_del(&connect_cache(&config).await?, &key, prefix).await,
        Commands::Clear { prefix, yes } => {
            if !yes {
                bail!("clear deletes keys on every node; pass --yes to confirm");
            }
            cmd_clear(&connect_cache(&config).await?, prefix).await
        }
    }
}

fn connect_router(config: &CliConfig) -> CommandRouter {
    CommandRouter::connect(&config.control, config.pool, config.retry)
        .with_span(info_span!("ringcachectl"))
}

async fn connect_cache(config: &CliConfig) -> Result<ShardedCache> {
    ShardedCache::connect(connect_router(config), config.cache.clone())
        .await
        .context("failed to connect cache client")
}

// -----------------------------------------------------------------------
// Ring administration
// -----------------------------------------------------------------------

async fn cmd_ring_show(resolver: &RingResolver) -> Result<()> {
    let ring = resolver.load_ring().await.context("failed to load ring")?;

    let mut counts: BTreeMap<&NodeUrl, usize> = BTreeMap::new();
    for (_, node) in ring.vnodes() {
        *counts.entry(node).or_default() += 1;
    }

    println!("Ring: {} virtual nodes on {} nodes", ring.len(), counts.len());
    for (node, vnodes) in counts {
        println!("  {node}  vnodes={vnodes}");
    }
    Ok(())
}

async fn cmd_ring_add(resolver: &RingResolver, url: &NodeUrl, vnodes: u32) -> Result<()> {
    let ring = resolver
        .add_node(url, vnodes)
        .await
        .with_context(|| format!("failed to add {url}"))?;
    println!("Added {url} ({vnodes} vnodes); ring has {} nodes", ring.nodes().len());
    Ok(())
}

async fn cmd_ring_remove(resolver: &RingResolver, url: &NodeUrl) -> Result<()> {
    let ring = resolver
        .remove_node(url)
        .await
        .with_context(|| format!("failed to remove {url}"))?;
    println!("Removed {url}; ring has {} nodes", ring.nodes().len());
    Ok(())
}

// -----------------------------------------------------------------------
// Routed commands
// -----------------------------------------------------------------------

async fn cmd_locate(router: &CommandRouter, key: &str) -> Result<()> {
    let node = router.node_for(key).await.context("failed to locate key")?;
    println!("{node}");
    Ok(())
}

async fn cmd_exec(router: &CommandRouter, command: &str, args: &[String]) -> Result<()> {
    let cmd = Command::new(command).args(args);
    let reply = router
        .execute(&cmd)
        .await
        .with_context(|| format!("failed to run {cmd}"))?;
    println!("{}", format_reply(&reply));
    Ok(())
}

/// Render a reply the way an interactive store client would.
fn format_reply(reply: &Reply) -> String {
    match reply {
        Reply::Nil => "(nil)".to_string(),
        Reply::Status(s) => s.clone(),
        Reply::Error(e) => format!("(error) {e}"),
        Reply::Int(n) => format!("(integer) {n}"),
        Reply::Bulk(b) => format!("{:?}", String::from_utf8_lossy(b)),
        Reply::Array(items) if items.is_empty() => "(empty array)".to_string(),
        Reply::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}) {}", i + 1, format_reply(item)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

// -----------------------------------------------------------------------
// Cache client commands
// -----------------------------------------------------------------------

async fn cmd_get(cache: &ShardedCache, key: &str, prefix: bool) -> Result<()> {
    let value = cache
        .cache_get_decoded::<String>(key, prefix)
        .await
        .context("failed to read value")?;
    println!("{}", format_decoded(&value));
    Ok(())
}

fn format_decoded(value: &Decoded<String>) -> String {
    match value {
        Decoded::Missing => "(nil)".to_string(),
        Decoded::Value(s) => format!("{s:?}"),
        Decoded::Raw(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

async fn cmd_set(
    cache: &ShardedCache,
    key: &str,
    value: &str,
    timeout: Option<i64>,
    prefix: bool,
) -> Result<()> {
    let stored = match value.parse::<i64>() {
        Ok(n) => cache.cache_set(key, &n, timeout, prefix).await,
        Err(_) => cache.cache_set(key, &value.to_string(), timeout, prefix).await,
    };
    stored.context("failed to store value")?;
    println!("OK");
    Ok(())
}

async fn cmd_del(cache: &ShardedCache, key: &str, prefix: bool) -> Result<()> {
    let removed = cache
        .cache_delete(key, prefix)
        .await
        .context("failed to delete value")?;
    println!("(integer) {}", u8::from(removed));
    Ok(())
}

async fn cmd_clear(cache: &ShardedCache, prefix: bool) -> Result<()> {
    let removed = cache.clear(prefix).await.context("failed to clear cache")?;
    println!("Deleted {removed} keys");
    Ok(())
}
