//! Manual smoke-test CLI for the cache protection engine.
//!
//! Exercises `get`/`put`/`evict`/`clear` against a real `CacheEngine` over a
//! live Redis connection, plus `stats`/`health` to inspect the protective
//! components' counters. No annotation layer here: every call goes through
//! the engine's direct API, synthesizing a default descriptor unless
//! `--ttl`/`--jitter`/`--bloom` ask for something else.

use anyhow::{Context, Result};
use cache_domain::{EngineConfig, JsonCodec, MethodDescriptor, OperationType};
use cache_engine::CacheEngine;
use cache_infrastructure::{RedisBackedStore, RedisStoreConfig};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cache-guard")]
#[command(author, version, about = "Cache protection engine smoke-test CLI")]
struct Cli {
    /// Redis connection URL (overrides REDIS_URL).
    #[arg(long, global = true, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a value, bypassing any loader or breakdown protection.
    Get {
        /// Cache namespace.
        #[arg(short, long)]
        cache: String,
        /// Cache key.
        #[arg(short, long)]
        key: String,
    },

    /// Write a JSON value through the engine.
    Put {
        /// Cache namespace.
        #[arg(short, long)]
        cache: String,
        /// Cache key.
        #[arg(short, long)]
        key: String,
        /// JSON-encoded value, e.g. `'"hello"'` or `'{"id":1}'`.
        #[arg(short = 'V', long)]
        value: String,
        /// Override the base TTL in seconds (0 = cache default, negative = never expires).
        #[arg(short, long)]
        ttl: Option<i64>,
        /// Apply jitter to the TTL with the given variance in `[0,1]`.
        #[arg(short, long)]
        jitter: Option<f64>,
        /// Consult/record the bloom filter for this key.
        #[arg(short, long)]
        bloom: bool,
    },

    /// Evict a single key (immediate delete plus scheduled double-delete).
    Evict {
        /// Cache namespace.
        #[arg(short, long)]
        cache: String,
        /// Cache key.
        #[arg(short, long)]
        key: String,
    },

    /// Evict every key under a cache namespace.
    Clear {
        /// Cache namespace.
        #[arg(short, long)]
        cache: String,
    },

    /// Print the engine's protective-component counters.
    Stats,

    /// Print backend reachability and in-flight job counts.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    cache_common::init_tracing(false, log_level).ok();

    let redis_config = match &cli.redis_url {
        Some(url) => RedisStoreConfig { url: url.clone() },
        None => RedisStoreConfig::from_env(),
    };
    let store = RedisBackedStore::connect(redis_config)
        .await
        .context("failed to connect to redis")?;
    let config = EngineConfig::load().context("failed to load engine config")?;
    let engine = CacheEngine::new(Arc::new(store), config);
    let codec: JsonCodec<serde_json::Value> = JsonCodec::new("json");

    match cli.command {
        Commands::Get { cache, key } => {
            match engine.get(&cache, &key, &codec).await? {
                Some(value) => println!("{value}"),
                None => println!("(miss)"),
            }
        }
        Commands::Put {
            cache,
            key,
            value,
            ttl,
            jitter,
            bloom,
        } => {
            let parsed: serde_json::Value =
                serde_json::from_str(&value).context("value must be valid JSON")?;
            if ttl.is_some() || jitter.is_some() || bloom {
                let mut descriptor = MethodDescriptor::default_for(&cache);
                if let Some(ttl) = ttl {
                    descriptor.ttl_seconds = ttl;
                }
                if let Some(variance) = jitter {
                    descriptor.random_ttl = true;
                    descriptor.variance = variance;
                }
                descriptor.use_bloom_filter = bloom;
                engine.register(&cache, &key, OperationType::Cache, descriptor);
            }
            engine.put(&cache, &key, &codec, &parsed).await?;
            println!("ok");
        }
        Commands::Evict { cache, key } => {
            engine.evict(&cache, &key).await?;
            println!("ok");
        }
        Commands::Clear { cache } => {
            engine.clear(&cache).await?;
            println!("ok");
        }
        Commands::Stats => {
            let stats = engine.stats();
            println!("registry hits={} misses={} evictions={} demotions={} protected_skips={}",
                stats.registry.hits, stats.registry.misses, stats.registry.evictions,
                stats.registry.demotions, stats.registry.protected_skips);
            println!("protection loader_invocations={} lock_timeouts={} penetration_rejections={}",
                stats.protection.loader_invocations, stats.protection.lock_timeouts,
                stats.protection.penetration_rejections);
        }
        Commands::Health => {
            let health = engine.health().await;
            println!("backend_reachable={}", health.backend_reachable);
            println!("registry_size={}", health.registry_size);
            println!("pre_refresh_in_flight={}", health.pre_refresh_in_flight);
        }
    }

    engine.shutdown(std::time::Duration::from_secs(5)).await;
    Ok(())
}
