//! Run a router node until interrupted.

use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use vrouter_node::cache::PolicyKind;
use vrouter_node::manifest::Manifest;
use vrouter_node::strategy::{build_strategy, StrategyKind};
use vrouter_node::{Router, RouterConfig, RoutingMode, Topology};

pub struct RunOptions {
    pub vrid: i32,
    pub topology: PathBuf,
    pub listen: SocketAddr,
    pub peers: Option<PathBuf>,
    pub strategy: String,
    pub policy: String,
    pub cache_size: usize,
    pub routing: String,
    pub ibandwidth: Option<u64>,
    pub ebandwidth: Option<u64>,
    pub queue_size: usize,
}

pub async fn run_router(opts: RunOptions) -> Result<()> {
    let topology = Topology::from_file(&opts.topology)
        .with_context(|| format!("loading topology {}", opts.topology.display()))?;

    let strategy: StrategyKind = opts.strategy.parse()?;
    let policy: PolicyKind = opts.policy.parse()?;
    let routing = match opts.routing.as_str() {
        "otf" => RoutingMode::Otf,
        "symmetric" => RoutingMode::Symmetric,
        other => anyhow::bail!("unknown routing mode '{}'", other),
    };

    // Region-based caching needs the placement manifest, kept beside the
    // topology file.
    let manifest = if strategy == StrategyKind::SmartRe {
        Some(
            Manifest::beside_topology(&opts.topology)
                .context("loading placement manifest")?,
        )
    } else {
        None
    };

    let mut config = RouterConfig::new(opts.vrid, topology, opts.listen);
    config.routing = routing;
    config.ibandwidth = opts.ibandwidth;
    config.ebandwidth = opts.ebandwidth;
    config.queue_size = opts.queue_size;
    if let Some(path) = &opts.peers {
        config.peers = load_peers(path)?;
    }

    let mut router = Router::new(config)?;
    router.register_handler(build_strategy(
        strategy,
        policy,
        opts.cache_size,
        manifest,
        opts.vrid,
    )?);
    router.start().await?;

    info!(
        "router {} up: listening on {}, strategy {} over {} ({} chunks)",
        opts.vrid,
        router.local_addr().expect("listener bound"),
        opts.strategy,
        opts.policy,
        opts.cache_size,
    );

    tokio::signal::ctrl_c().await?;
    warn!("router {}: interrupted, shutting down", opts.vrid);
    Ok(())
}

/// Peer address map: `{"1": "10.0.0.2:9400", ...}`.
fn load_peers(path: &PathBuf) -> Result<HashMap<i32, SocketAddr>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading peer map {}", path.display()))?;
    let parsed: HashMap<String, String> =
        serde_json::from_str(&raw).context("parsing peer map")?;
    let mut peers = HashMap::new();
    for (vrid, addr) in parsed {
        let vrid: i32 = vrid
            .parse()
            .with_context(|| format!("peer id '{}'", vrid))?;
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("peer address '{}'", addr))?;
        peers.insert(vrid, addr);
    }
    Ok(peers)
}
