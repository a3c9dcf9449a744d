//! Placement manifest validation.

use anyhow::{Context, Result};
use std::path::PathBuf;
use vrouter_node::manifest::Manifest;

pub fn validate_manifest(file: PathBuf) -> Result<()> {
    let manifest = Manifest::from_file(&file)
        .with_context(|| format!("loading manifest {}", file.display()))?;

    let mut pathids: Vec<i32> = manifest.paths.keys().copied().collect();
    pathids.sort_unstable();

    println!("manifest ok: {} paths", pathids.len());
    for pathid in pathids {
        let spec = &manifest.paths[&pathid];
        let hops: Vec<String> = spec.path.iter().map(|v| v.to_string()).collect();
        let covered = manifest.covered_range(pathid);
        println!(
            "  path {:>4}: {}  ({} caching routers, {:.0}% of hash space covered)",
            pathid,
            hops.join(" -> "),
            spec.routers.len(),
            covered * 100.0,
        );
    }
    Ok(())
}
