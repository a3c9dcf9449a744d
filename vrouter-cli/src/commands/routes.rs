//! Offline route inspection.

use anyhow::{Context, Result};
use std::path::PathBuf;
use vrouter_node::Topology;

pub fn show_routes(topology: PathBuf, vrid: i32, dst: Option<i32>) -> Result<()> {
    let topo = Topology::from_file(&topology)
        .with_context(|| format!("loading topology {}", topology.display()))?;
    if !topo.contains(vrid) {
        anyhow::bail!("router {} is not in the topology", vrid);
    }

    let pathdict = topo.build_pathdict();
    let rtable = topo.symmetric_routing_table(vrid, &pathdict);

    let mut dsts: Vec<i32> = match dst {
        Some(d) => vec![d],
        None => {
            let mut all: Vec<i32> = rtable.keys().copied().collect();
            all.sort_unstable();
            all
        }
    };
    dsts.retain(|&d| d != vrid);

    println!("routes from {}:", vrid);
    for d in dsts {
        match (rtable.get(&d), pathdict.get(&(vrid, d))) {
            (Some(next), Some(path)) => {
                let hops: Vec<String> = path.iter().map(|v| v.to_string()).collect();
                println!("  {:>6}  via {:>6}  path {}", d, next, hops.join(" -> "));
            }
            _ => println!("  {:>6}  unreachable", d),
        }
    }
    Ok(())
}
