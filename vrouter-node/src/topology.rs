//! Overlay topology parsing and shortest-path routing.
//!
//! The topology is an undirected weighted multigraph read from a
//! line-oriented description, one edge per line:
//!
//! ```text
//! <id> -> <id> [weight] [bandwidth] [delay] [lossrate]
//! ```
//!
//! `#`-prefixed and blank lines are ignored. Missing fields default to
//! weight 1, unlimited bandwidth, zero delay and zero loss.
//!
//! Two routing computations are provided: single-source Dijkstra for
//! on-the-fly next-hop tables, and all-pairs Floyd–Warshall with full path
//! reconstruction. The latter yields a [`PathDict`] whose paths are
//! symmetric, which the cooperative caching strategies rely on when they
//! reason about a router's position along a path.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use vrouter_common::types::VrId;
use vrouter_common::Error;

/// Properties of one overlay link.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkProps {
    /// Routing weight, at least 1.
    pub weight: u64,
    /// Bandwidth cap in bytes per second, `None` = unlimited.
    pub bandwidth: Option<u64>,
    /// One-way delay in seconds.
    pub delay: f64,
    /// Probability in `[0,1]` that an incoming frame is discarded.
    pub lossrate: f64,
}

impl Default for LinkProps {
    fn default() -> Self {
        Self {
            weight: 1,
            bandwidth: None,
            delay: 0.0,
            lossrate: 0.0,
        }
    }
}

/// All shortest paths, keyed by ordered (src, dst) pair.
pub type PathDict = HashMap<(VrId, VrId), Vec<VrId>>;

/// The parsed overlay graph.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    routers: BTreeSet<VrId>,
    links: HashMap<(VrId, VrId), LinkProps>,
}

/// Normalize an edge key so (a,b) and (b,a) address the same link.
fn link_key(a: VrId, b: VrId) -> (VrId, VrId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl Topology {
    /// Parse a topology from its textual description.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let mut topo = Topology::default();
        for (lineno, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            topo.parse_edge(line)
                .map_err(|e| Error::Topology(format!("line {}: {}", lineno + 1, e)))?;
        }
        Ok(topo)
    }

    /// Read a topology description from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    fn parse_edge(&mut self, line: &str) -> Result<(), String> {
        let (left, right) = line
            .split_once("->")
            .ok_or_else(|| format!("expected '<id> -> <id> ...', got {:?}", line))?;
        let a: VrId = left
            .trim()
            .parse()
            .map_err(|_| format!("bad router id {:?}", left.trim()))?;
        let mut fields = right.split_whitespace();
        let b: VrId = fields
            .next()
            .ok_or("missing second router id")?
            .parse()
            .map_err(|_| "bad second router id".to_string())?;

        let mut props = LinkProps::default();
        if let Some(w) = fields.next() {
            props.weight = w.parse().map_err(|_| format!("bad weight {:?}", w))?;
        }
        if let Some(bw) = fields.next() {
            let bw: u64 = bw.parse().map_err(|_| format!("bad bandwidth {:?}", bw))?;
            // Zero on the wire means unconstrained.
            props.bandwidth = if bw == 0 { None } else { Some(bw) };
        }
        if let Some(d) = fields.next() {
            props.delay = d.parse().map_err(|_| format!("bad delay {:?}", d))?;
        }
        if let Some(l) = fields.next() {
            let lossrate: f64 = l.parse().map_err(|_| format!("bad lossrate {:?}", l))?;
            if !(0.0..=1.0).contains(&lossrate) {
                return Err(format!("lossrate {} outside [0,1]", lossrate));
            }
            props.lossrate = lossrate;
        }

        self.routers.insert(a);
        self.routers.insert(b);
        self.links.insert(link_key(a, b), props);
        Ok(())
    }

    /// All router ids, ascending.
    pub fn routers(&self) -> impl Iterator<Item = VrId> + '_ {
        self.routers.iter().copied()
    }

    pub fn contains(&self, vrid: VrId) -> bool {
        self.routers.contains(&vrid)
    }

    /// Properties of the link between two adjacent routers.
    pub fn link(&self, a: VrId, b: VrId) -> Option<&LinkProps> {
        self.links.get(&link_key(a, b))
    }

    /// Neighbour set of a router.
    pub fn neighbours(&self, src: VrId) -> Vec<VrId> {
        let mut out = Vec::new();
        for &(a, b) in self.links.keys() {
            if src == a && a != b {
                out.push(b);
            } else if src == b {
                out.push(a);
            }
        }
        out.sort_unstable();
        out
    }

    /// Edge weight between two routers: 0 on the diagonal, `None` when the
    /// routers are not adjacent.
    pub fn weight(&self, m: VrId, n: VrId) -> Option<u64> {
        if m == n {
            return Some(0);
        }
        self.links.get(&link_key(m, n)).map(|p| p.weight)
    }

    /* ------------------------------------------------------------ *
     * Single-source shortest path (Dijkstra)
     * ------------------------------------------------------------ */

    /// Compute a next-hop table from `src` to every reachable destination.
    ///
    /// Ties between minimum-distance candidates are broken by the smaller
    /// router id; callers must not rely on a particular tie-break.
    pub fn dijkstra(&self, src: VrId) -> HashMap<VrId, VrId> {
        let mut unvisited: BTreeSet<VrId> = self.routers.clone();
        let mut dist: HashMap<VrId, u64> = HashMap::new();
        let mut prev: HashMap<VrId, VrId> = HashMap::new();
        dist.insert(src, 0);

        while !unvisited.is_empty() {
            let m = match unvisited
                .iter()
                .filter_map(|&x| dist.get(&x).map(|&d| (d, x)))
                .min()
            {
                Some((_, x)) => x,
                // Everything left is unreachable.
                None => break,
            };
            unvisited.remove(&m);
            let dm = dist[&m];
            for n in self.neighbours(m) {
                if let Some(w) = self.weight(m, n) {
                    let alt = dm + w;
                    if dist.get(&n).map_or(true, |&d| alt < d) {
                        dist.insert(n, alt);
                        prev.insert(n, m);
                    }
                }
            }
        }

        // Walk predecessor links back to the first hop after the source.
        let mut rtable = HashMap::new();
        for &x in &self.routers {
            if x == src || !dist.contains_key(&x) {
                continue;
            }
            let mut q = x;
            loop {
                match prev.get(&q) {
                    Some(&p) if p == src => {
                        rtable.insert(x, q);
                        break;
                    }
                    Some(&p) => q = p,
                    None => break,
                }
            }
        }
        rtable
    }

    /// Total weight of the shortest path from `src` to every reachable node.
    pub fn distances(&self, src: VrId) -> HashMap<VrId, u64> {
        let mut unvisited: BTreeSet<VrId> = self.routers.clone();
        let mut dist: HashMap<VrId, u64> = HashMap::new();
        dist.insert(src, 0);
        while !unvisited.is_empty() {
            let m = match unvisited
                .iter()
                .filter_map(|&x| dist.get(&x).map(|&d| (d, x)))
                .min()
            {
                Some((_, x)) => x,
                None => break,
            };
            unvisited.remove(&m);
            let dm = dist[&m];
            for n in self.neighbours(m) {
                if let Some(w) = self.weight(m, n) {
                    let alt = dm + w;
                    if dist.get(&n).map_or(true, |&d| alt < d) {
                        dist.insert(n, alt);
                    }
                }
            }
        }
        dist
    }

    /* ------------------------------------------------------------ *
     * All-pairs shortest path (Floyd–Warshall)
     * ------------------------------------------------------------ */

    /// Build the full path dictionary via Floyd–Warshall with an
    /// intermediate-vertex table.
    ///
    /// The resulting paths are symmetric: `path(i,j)` reversed equals
    /// `path(j,i)`, because distance and update order are identical in both
    /// directions on an undirected graph.
    pub fn build_pathdict(&self) -> PathDict {
        let routers: Vec<VrId> = self.routers.iter().copied().collect();
        let mut dist: HashMap<(VrId, VrId), u64> = HashMap::new();
        let mut via: HashMap<(VrId, VrId), VrId> = HashMap::new();

        for &i in &routers {
            for &j in &routers {
                if let Some(w) = self.weight(i, j) {
                    dist.insert((i, j), w);
                }
            }
        }

        for &k in &routers {
            for &i in &routers {
                let dik = match dist.get(&(i, k)) {
                    Some(&d) => d,
                    None => continue,
                };
                for &j in &routers {
                    let dkj = match dist.get(&(k, j)) {
                        Some(&d) => d,
                        None => continue,
                    };
                    let through = dik + dkj;
                    if dist.get(&(i, j)).map_or(true, |&d| through < d) {
                        dist.insert((i, j), through);
                        via.insert((i, j), k);
                    }
                }
            }
        }

        let mut pathdict = PathDict::new();
        for &i in &routers {
            for &j in &routers {
                if i == j || !dist.contains_key(&(i, j)) {
                    continue;
                }
                let mut path = vec![i];
                Self::fw_path(i, j, &via, &mut path);
                path.push(j);
                pathdict.insert((i, j), path);
            }
        }
        pathdict
    }

    /// Expand the intermediate vertices between `i` and `j` into `out`.
    fn fw_path(i: VrId, j: VrId, via: &HashMap<(VrId, VrId), VrId>, out: &mut Vec<VrId>) {
        if let Some(&k) = via.get(&(i, j)) {
            Self::fw_path(i, k, via, out);
            out.push(k);
            Self::fw_path(k, j, via, out);
        }
    }

    /// Derive a next-hop table for `src` from a path dictionary, so that
    /// forward and reverse traffic traverse the same routers.
    pub fn symmetric_routing_table(&self, src: VrId, pathdict: &PathDict) -> HashMap<VrId, VrId> {
        let mut rtable = HashMap::new();
        for &dst in &self.routers {
            if let Some(path) = pathdict.get(&(src, dst)) {
                if path.len() > 1 {
                    rtable.insert(dst, path[1]);
                }
            }
        }
        rtable
    }
}

/// Whether `vrid` is the edge router (first interior hop) of path(src,dst).
pub fn is_edge(pathdict: &PathDict, src: VrId, dst: VrId, vrid: VrId) -> bool {
    pathdict
        .get(&(src, dst))
        .and_then(|p| p.get(1))
        .map_or(false, |&hop| hop == vrid)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIAMOND: &str = "
        # a diamond with a heavy southern route
        0 -> 1 1
        1 -> 3 1
        0 -> 2 1
        2 -> 3 5
        3 -> 4 1
    ";

    #[test]
    fn parse_defaults_and_comments() {
        let topo = Topology::parse("# comment\n\n1 -> 2\n2 -> 3 4 1000 0.5 0.25\n").unwrap();
        assert_eq!(topo.routers().collect::<Vec<_>>(), vec![1, 2, 3]);
        let plain = topo.link(1, 2).unwrap();
        assert_eq!(plain.weight, 1);
        assert_eq!(plain.bandwidth, None);
        assert_eq!(plain.delay, 0.0);
        assert_eq!(plain.lossrate, 0.0);
        let tuned = topo.link(3, 2).unwrap();
        assert_eq!(tuned.weight, 4);
        assert_eq!(tuned.bandwidth, Some(1000));
        assert_eq!(tuned.delay, 0.5);
        assert_eq!(tuned.lossrate, 0.25);
    }

    #[test]
    fn zero_bandwidth_means_unlimited() {
        let topo = Topology::parse("1 -> 2 1 0").unwrap();
        assert_eq!(topo.link(1, 2).unwrap().bandwidth, None);
    }

    #[test]
    fn bad_lossrate_rejected() {
        assert!(Topology::parse("1 -> 2 1 0 0 1.5").is_err());
    }

    #[test]
    fn dijkstra_avoids_heavy_edge() {
        let topo = Topology::parse(DIAMOND).unwrap();
        let rtable = topo.dijkstra(0);
        // 0 -> 3 goes through 1, not through the weight-5 edge at 2.
        assert_eq!(rtable[&3], 1);
        assert_eq!(rtable[&4], 1);
        assert_eq!(rtable[&2], 2);
    }

    #[test]
    fn unreachable_destination_has_no_next_hop() {
        let topo = Topology::parse("0 -> 1\n5 -> 6").unwrap();
        let rtable = topo.dijkstra(0);
        assert_eq!(rtable.get(&5), None);
        assert_eq!(rtable.get(&6), None);
        assert!(topo.build_pathdict().get(&(0, 5)).is_none());
    }

    #[test]
    fn pathdict_is_symmetric() {
        let topo = Topology::parse(DIAMOND).unwrap();
        let pathdict = topo.build_pathdict();
        for (&(i, j), path) in &pathdict {
            let mut rev = path.clone();
            rev.reverse();
            assert_eq!(pathdict[&(j, i)], rev, "path({},{}) not symmetric", i, j);
        }
    }

    #[test]
    fn dijkstra_and_floyd_warshall_agree_on_weight() {
        let topo = Topology::parse(DIAMOND).unwrap();
        let pathdict = topo.build_pathdict();
        for src in topo.routers() {
            let dist = topo.distances(src);
            for dst in topo.routers() {
                if src == dst {
                    continue;
                }
                let path = &pathdict[&(src, dst)];
                let w: u64 = path
                    .windows(2)
                    .map(|e| topo.weight(e[0], e[1]).unwrap())
                    .sum();
                assert_eq!(w, dist[&dst], "weight mismatch for ({},{})", src, dst);
            }
        }
    }

    #[test]
    fn symmetric_rtable_next_hops_lie_on_paths() {
        let topo = Topology::parse(DIAMOND).unwrap();
        let pathdict = topo.build_pathdict();
        let rtable = topo.symmetric_routing_table(0, &pathdict);
        for (dst, nxt) in rtable {
            assert_eq!(pathdict[&(0, dst)][1], nxt);
        }
    }

    #[test]
    fn edge_router_check() {
        let topo = Topology::parse(DIAMOND).unwrap();
        let pathdict = topo.build_pathdict();
        assert!(is_edge(&pathdict, 0, 4, 1));
        assert!(!is_edge(&pathdict, 0, 4, 2));
    }
}
