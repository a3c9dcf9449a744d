//! Cache placement manifest for region-based caching.
//!
//! The placement solver decides, per monitored path, which routers cache
//! which slice of the header-hash space and how many slots each gets. Its
//! output is a JSON file loaded here; the file lives beside the topology
//! file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use vrouter_common::types::VrId;
use vrouter_common::{Error, Result};

/// One router's share of a path: the half-open header-hash interval it is
/// responsible for and the number of bucket slots backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterAssignment {
    /// Covered interval `[range.0, range.1)` of the hash space.
    pub range: (f32, f32),
    pub quota: usize,
}

/// A monitored path and its per-router assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSpec {
    /// Full route, server first, client last.
    pub path: Vec<VrId>,
    pub routers: HashMap<VrId, RouterAssignment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub paths: HashMap<i32, PathSpec>,
}

impl Manifest {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let manifest: Manifest = serde_json::from_str(&raw)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.as_ref().display(), e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Conventional location: `manifest.json` in the topology file's
    /// directory.
    pub fn beside_topology(topology_file: impl AsRef<Path>) -> Result<Self> {
        let dir = topology_file
            .as_ref()
            .parent()
            .unwrap_or_else(|| Path::new("."));
        Self::from_file(dir.join("manifest.json"))
    }

    fn validate(&self) -> Result<()> {
        for (pathid, spec) in &self.paths {
            if spec.path.len() < 2 {
                return Err(Error::Manifest(format!(
                    "path {} has fewer than two hops",
                    pathid
                )));
            }
            for (vrid, assignment) in &spec.routers {
                if !spec.path.contains(vrid) {
                    return Err(Error::Manifest(format!(
                        "path {}: router {} assigned but not on the path",
                        pathid, vrid
                    )));
                }
                let (lo, hi) = assignment.range;
                if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo >= hi {
                    return Err(Error::Manifest(format!(
                        "path {}: router {} has an invalid range [{}, {})",
                        pathid, vrid, lo, hi
                    )));
                }
            }
        }
        Ok(())
    }

    /// Buckets the given router must allocate. An ingress keeps a shadow
    /// bucket for every interior router of its paths; an interior router
    /// keeps only its own.
    pub fn bucket_quotas(&self, vrid: VrId) -> Vec<(i32, VrId, usize)> {
        let mut quotas = Vec::new();
        for (&pathid, spec) in &self.paths {
            if spec.path.first() == Some(&vrid) {
                for interior in &spec.path[1..spec.path.len() - 1] {
                    if let Some(assignment) = spec.routers.get(interior) {
                        quotas.push((pathid, *interior, assignment.quota));
                    }
                }
            } else if let Some(assignment) = spec.routers.get(&vrid) {
                quotas.push((pathid, vrid, assignment.quota));
            }
        }
        quotas
    }

    /// Map (server, client) endpoint pairs to path ids.
    pub fn path_ids(&self) -> HashMap<(VrId, VrId), i32> {
        self.paths
            .iter()
            .filter_map(|(&pathid, spec)| {
                let server = *spec.path.first()?;
                let client = *spec.path.last()?;
                Some(((server, client), pathid))
            })
            .collect()
    }

    /// Whether a header hash falls in the router's range on a path.
    pub fn in_range(&self, pathid: i32, vrid: VrId, hh: f32) -> bool {
        self.paths
            .get(&pathid)
            .and_then(|spec| spec.routers.get(&vrid))
            .map(|a| a.range.0 <= hh && hh < a.range.1)
            .unwrap_or(false)
    }

    /// The router whose range covers a header hash on a path.
    pub fn responsible_router(&self, pathid: i32, hh: f32) -> Option<VrId> {
        let spec = self.paths.get(&pathid)?;
        spec.routers
            .iter()
            .find(|(_, a)| a.range.0 <= hh && hh < a.range.1)
            .map(|(&vrid, _)| vrid)
    }

    /// Portion of the hash space covered by any router on a path.
    pub fn covered_range(&self, pathid: i32) -> f32 {
        self.paths
            .get(&pathid)
            .map(|spec| spec.routers.values().map(|a| a.range.1 - a.range.0).sum())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        let json = r#"{
            "paths": {
                "1": {
                    "path": [0, 1, 2, 3, 5],
                    "routers": {
                        "1": { "range": [0.0, 0.2], "quota": 100 },
                        "2": { "range": [0.2, 0.5], "quota": 100 },
                        "3": { "range": [0.5, 0.7], "quota": 100 }
                    }
                },
                "2": {
                    "path": [0, 1, 4, 6],
                    "routers": {
                        "1": { "range": [0.0, 0.1], "quota": 50 },
                        "4": { "range": [0.1, 1.0], "quota": 200 }
                    }
                }
            }
        }"#;
        let m: Manifest = serde_json::from_str(json).unwrap();
        m.validate().unwrap();
        m
    }

    #[test]
    fn ingress_allocates_for_every_interior() {
        let m = sample();
        let mut quotas = m.bucket_quotas(0);
        quotas.sort_unstable();
        assert_eq!(
            quotas,
            vec![(1, 1, 100), (1, 2, 100), (1, 3, 100), (2, 1, 50), (2, 4, 200)]
        );
    }

    #[test]
    fn interior_allocates_only_its_own() {
        let m = sample();
        assert_eq!(m.bucket_quotas(2), vec![(1, 2, 100)]);
        // Router 5 is a client endpoint with no assignment.
        assert!(m.bucket_quotas(5).is_empty());
    }

    #[test]
    fn endpoint_pairs_map_to_path_ids() {
        let m = sample();
        let ids = m.path_ids();
        assert_eq!(ids.get(&(0, 5)), Some(&1));
        assert_eq!(ids.get(&(0, 6)), Some(&2));
    }

    #[test]
    fn range_membership_is_half_open() {
        let m = sample();
        assert!(m.in_range(1, 2, 0.2));
        assert!(m.in_range(1, 2, 0.49));
        assert!(!m.in_range(1, 2, 0.5));
        assert_eq!(m.responsible_router(1, 0.6), Some(3));
        assert_eq!(m.responsible_router(1, 0.9), None);
        assert!((m.covered_range(1) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn off_path_assignment_is_rejected() {
        let mut m = sample();
        m.paths
            .get_mut(&1)
            .unwrap()
            .routers
            .insert(9, RouterAssignment { range: (0.7, 0.8), quota: 1 });
        assert!(m.validate().is_err());
    }
}
