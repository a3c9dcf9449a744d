use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf};

mod commands;

/// Virtual router for in-network caching experiments
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a router node
    Run {
        /// This router's id in the topology
        #[clap(short = 'i', long)]
        vrid: i32,

        /// Path to the topology file
        #[clap(short, long)]
        topology: PathBuf,

        /// Address to listen on for neighbour connections
        #[clap(short, long, default_value = "0.0.0.0:9400")]
        listen: SocketAddr,

        /// JSON file mapping neighbour ids to addresses
        #[clap(short, long)]
        peers: Option<PathBuf>,

        /// Caching strategy
        #[clap(short, long, default_value = "cachedbit")]
        strategy: String,

        /// Cache replacement policy
        #[clap(long, default_value = "lru")]
        policy: String,

        /// Cache capacity in chunks
        #[clap(long, default_value = "1000")]
        cache_size: usize,

        /// Routing table computation (otf or symmetric)
        #[clap(long, default_value = "symmetric")]
        routing: String,

        /// Ingress bandwidth cap in bytes/s
        #[clap(long)]
        ibandwidth: Option<u64>,

        /// Egress bandwidth cap in bytes/s
        #[clap(long)]
        ebandwidth: Option<u64>,

        /// Pipeline queue capacity in messages (0 = default)
        #[clap(long, default_value = "0")]
        queue_size: usize,
    },

    /// Print routes computed from a topology file
    Routes {
        /// Path to the topology file
        #[clap(short, long)]
        topology: PathBuf,

        /// Source router id
        #[clap(short = 'i', long)]
        vrid: i32,

        /// Only show the route toward this destination
        #[clap(short, long)]
        dst: Option<i32>,
    },

    /// Validate a placement manifest
    Manifest {
        /// Path to the manifest file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .init();

    match cli.command {
        Commands::Run {
            vrid,
            topology,
            listen,
            peers,
            strategy,
            policy,
            cache_size,
            routing,
            ibandwidth,
            ebandwidth,
            queue_size,
        } => {
            commands::run::run_router(commands::run::RunOptions {
                vrid,
                topology,
                listen,
                peers,
                strategy,
                policy,
                cache_size,
                routing,
                ibandwidth,
                ebandwidth,
                queue_size,
            })
            .await?;
        }
        Commands::Routes {
            topology,
            vrid,
            dst,
        } => {
            commands::routes::show_routes(topology, vrid, dst)?;
        }
        Commands::Manifest { file } => {
            commands::manifest::validate_manifest(file)?;
        }
    }

    Ok(())
}
