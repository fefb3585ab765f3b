//! `tetherctl`: offline diagnostics for Tether routing and caching.
//!
//! # Usage
//!
//! ```text
//! tetherctl shards -n a,b,c                      # shard map grid and per-node counts
//! tetherctl shards -n a,b,c --builder greedy     # same with the greedy builder
//! tetherctl moves -n a,b,c --remove b            # reassignment when b leaves
//! tetherctl ring -n a,b,c --hash 12345 --span 2  # owner and replicas of a hash
//! tetherctl cache-key --service users --method get --args '[42]'
//! tetherctl retry-delays -c tether.toml          # retry schedule from config
//! ```

mod config;

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tether_cache::{RpcCacheKey, RpcCacheValue, TextOrBytes};
use tether_placement::{HashRing, ShardMap, builder_for};
use tether_reprocess::ReprocessorSettings;
use tether_types::{BuilderKind, PlacementConfig, ReprocessConfig};
use tracing::debug;

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "tetherctl",
    version,
    about = "Inspect Tether shard placement, hash rings, and cache keys"
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
    /// Print the shard map for a node list.
    Shards {
        #[command(flatten)]
        placement: PlacementArgs,
    },

    /// Show which shards change owner when a node leaves.
    Moves {
        #[command(flatten)]
        placement: PlacementArgs,

        /// The node that leaves.
        #[arg(short, long)]
        remove: String,
    },

    /// Look up a hash on a consistent hashing ring.
    Ring {
        /// Ring nodes, comma-separated.
        #[arg(short, long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,

        /// The 32-bit hash to look up.
        #[arg(long, allow_hyphen_values = true)]
        hash: i32,

        /// Number of consecutive nodes to list.
        #[arg(long, default_value = "1")]
        span: usize,

        /// Positions to walk past the owner.
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        offset: isize,
    },

    /// Compute the cache key for a call, and optionally a result's content hash.
    CacheKey {
        #[arg(long)]
        service: String,

        #[arg(long)]
        method: String,

        /// Serialized arguments, as text.
        #[arg(long, default_value = "")]
        args: String,

        /// Serialized result, as text.
        #[arg(long)]
        result: Option<String>,
    },

    /// Print the retry delay schedule.
    RetryDelays {
        /// Override `max_retry_count`.
        #[arg(long)]
        max_retry_count: Option<u32>,
    },
}

/// Node list plus overrides for the `[placement]` config section.
#[derive(Args)]
struct PlacementArgs {
    /// Nodes, comma-separated, in indexing order.
    #[arg(short, long, value_delimiter = ',', required = true)]
    nodes: Vec<String>,

    /// Number of shards.
    #[arg(long)]
    count: Option<u32>,

    /// Shard map builder.
    #[arg(long, value_enum)]
    builder: Option<BuilderArg>,

    /// Maximum per-node shard count spread (rendezvous only).
    #[arg(long)]
    max_imbalance: Option<u32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuilderArg {
    Greedy,
    Rendezvous,
}

impl From<BuilderArg> for BuilderKind {
    fn from(arg: BuilderArg) -> Self {
        match arg {
            BuilderArg::Greedy => BuilderKind::Greedy,
            BuilderArg::Rendezvous => BuilderKind::Rendezvous,
        }
    }
}

impl PlacementArgs {
    /// CLI args override config file values.
    fn apply(&self, config: &mut PlacementConfig) {
        if let Some(count) = self.count {
            config.shard_count = count;
        }
        if let Some(builder) = self.builder {
            config.builder = builder.into();
        }
        if let Some(max_imbalance) = self.max_imbalance {
            config.max_imbalance = max_imbalance;
        }
    }
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    setup_tracing(&config.log.level);

    let output = match cli.command {
        Commands::Shards { placement } => {
            placement.apply(&mut config.placement);
            render_shards(&config.placement, placement.nodes)?
        }
        Commands::Moves { placement, remove } => {
            placement.apply(&mut config.placement);
            render_moves(&config.placement, placement.nodes, &remove)?
        }
        Commands::Ring {
            nodes,
            hash,
            span,
            offset,
        } => render_ring(nodes, hash, span, offset)?,
        Commands::CacheKey {
            service,
            method,
            args,
            result,
        } => render_cache_key(&service, &method, &args, result.as_deref()),
        Commands::RetryDelays { max_retry_count } => {
            if let Some(max) = max_retry_count {
                config.reprocess.max_retry_count = max;
            }
            render_retry_delays(&config.reprocess)?
        }
    };
    print!("{output}");
    Ok(())
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
/// Logs go to stderr so they never mix with command output.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// -----------------------------------------------------------------------
// tetherctl shards / moves
// -----------------------------------------------------------------------

fn build_map(config: &PlacementConfig, nodes: Vec<String>) -> Result<ShardMap<String>> {
    let builder = builder_for(config).context("invalid placement config")?;
    Ok(ShardMap::with_builder(
        config.shard_count as usize,
        nodes,
        builder.as_ref(),
    ))
}

fn render_shards(config: &PlacementConfig, nodes: Vec<String>) -> Result<String> {
    let map = build_map(config, nodes)?;
    let mut out = format!("{map}\n\n");
    for (node, count) in map.nodes().iter().zip(map.shard_counts()) {
        let _ = writeln!(out, "{node}: {count} shards");
    }
    Ok(out)
}

fn render_moves(config: &PlacementConfig, nodes: Vec<String>, remove: &str) -> Result<String> {
    if !nodes.iter().any(|n| n == remove) {
        bail!("node `{remove}` is not in the node list");
    }
    let remaining: Vec<String> = nodes.iter().filter(|n| *n != remove).cloned().collect();
    let before = build_map(config, nodes)?;
    let after = build_map(config, remaining)?;

    let moves = ShardMap::moves(&before, &after);
    let from_removed = moves
        .iter()
        .filter(|m| m.from.map(String::as_str) == Some(remove))
        .count();
    debug!(total = moves.len(), from_removed, "computed moves");

    let mut out = String::new();
    for m in &moves {
        let _ = writeln!(
            out,
            "shard {}: {} -> {}",
            m.shard,
            owner_name(m.from),
            owner_name(m.to)
        );
    }
    let _ = writeln!(
        out,
        "{} moved: {} from {remove}, {} extra",
        moves.len(),
        from_removed,
        moves.len() - from_removed
    );
    Ok(out)
}

fn owner_name(node: Option<&String>) -> &str {
    node.map_or("-", String::as_str)
}

// -----------------------------------------------------------------------
// tetherctl ring
// -----------------------------------------------------------------------

fn render_ring(nodes: Vec<String>, hash: i32, span: usize, offset: isize) -> Result<String> {
    let ring = HashRing::new(nodes);
    let Some(owner) = ring.find_node(hash, offset) else {
        bail!("ring has no nodes");
    };

    let mut out = String::new();
    for (node, node_hash) in ring.nodes() {
        let _ = writeln!(out, "{node_hash:>11} {node}");
    }
    let _ = writeln!(out, "owner: {owner}");
    let _ = writeln!(out, "span: {}", ring.span(hash, span, offset).join(", "));
    Ok(out)
}

// -----------------------------------------------------------------------
// tetherctl cache-key
// -----------------------------------------------------------------------

fn render_cache_key(service: &str, method: &str, args: &str, result: Option<&str>) -> String {
    let key = RpcCacheKey::new(service, method, TextOrBytes::text(args));
    let mut out = format!("key: {key}\nhash: {}\n", key.hash_code());
    if let Some(result) = result {
        let value = RpcCacheValue::from_data(result.as_bytes().to_vec());
        let _ = writeln!(out, "content hash: {}", value.hash());
    }
    out
}

// -----------------------------------------------------------------------
// tetherctl retry-delays
// -----------------------------------------------------------------------

fn render_retry_delays(config: &ReprocessConfig) -> Result<String> {
    let settings =
        ReprocessorSettings::from_config(config).context("invalid [reprocess] config")?;
    let mut out = String::new();
    for try_index in 1..=settings.max_retry_count {
        let delay = settings.retry_delays.base_delay(try_index);
        let _ = writeln!(out, "retry #{try_index}: {}ms", delay.as_millis());
    }
    let _ = writeln!(
        out,
        "jitter: ±{:.0}%",
        config.retry_delay_spread * 100.0
    );
    Ok(out)
}
