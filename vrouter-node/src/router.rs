//! The virtual router: queues, handler chain and forwarding loops.
//!
//! One router owns three queues: a shared ingress queue fed by every link,
//! an egress queue drained into the per-neighbour links, and a local
//! delivery queue consumed by whatever application sits on top. The
//! dispatch loop drains ingress through an ordered chain of handlers; the
//! chain always ends in the fixed bypass handler that classifies a message
//! as local or transit.

use crate::link::{Link, Shaper};
use crate::strategy::Strategy;
use crate::topology::{is_edge, PathDict, Topology};
use crate::DEFAULT_QUEUE_SIZE;
use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use vrouter_common::metrics::RouterMetrics;
use vrouter_common::types::{ChunkId, MessageType, VrId, DIGEST_LEN, NXT_UNSET};
use vrouter_common::wire::MessageHeader;

/// How the routing table is computed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Single-source Dijkstra, next hops only.
    Otf,
    /// All-pairs Floyd–Warshall with the symmetric path dictionary.
    Symmetric,
}

/// Static configuration of one router instance.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub vrid: VrId,
    pub topology: Topology,
    pub routing: RoutingMode,
    /// Aggregate ingress bandwidth in bytes/s, `None` = unlimited.
    pub ibandwidth: Option<u64>,
    /// Aggregate egress bandwidth in bytes/s, `None` = unlimited.
    pub ebandwidth: Option<u64>,
    /// Queue capacity in messages, 0 = default.
    pub queue_size: usize,
    /// Address to accept neighbour connections on.
    pub listen_addr: SocketAddr,
    /// Logical-to-physical map for the neighbours this router dials.
    pub peers: HashMap<VrId, SocketAddr>,
}

impl RouterConfig {
    pub fn new(vrid: VrId, topology: Topology, listen_addr: SocketAddr) -> Self {
        Self {
            vrid,
            topology,
            routing: RoutingMode::Symmetric,
            ibandwidth: None,
            ebandwidth: None,
            queue_size: 0,
            listen_addr,
            peers: HashMap::new(),
        }
    }
}

/// Cheap cloneable view of a router, handed to strategies and applications.
#[derive(Clone)]
pub struct RouterHandle {
    pub vrid: VrId,
    /// Random per-instance id used as the caching-router mark.
    pub rid: ChunkId,
    topology: Arc<Topology>,
    pathdict: Arc<PathDict>,
    rtable: Arc<RwLock<HashMap<VrId, VrId>>>,
    iqueue: mpsc::Sender<MessageHeader>,
    equeue: mpsc::Sender<MessageHeader>,
    cqueue: mpsc::Sender<MessageHeader>,
    metrics: Arc<RouterMetrics>,
}

impl RouterHandle {
    /// Inject a message into the forwarding pipeline.
    ///
    /// Locally-originated traffic goes through the ingress queue so it
    /// traverses the handler chain like transit traffic does; a request can
    /// therefore be answered by this router's own cache.
    pub async fn send(&self, hdr: MessageHeader) -> Result<()> {
        self.iqueue
            .send(hdr)
            .await
            .map_err(|_| anyhow!("router {} is shut down", self.vrid))
    }

    /// Queue a message straight for egress, skipping the handler chain.
    pub async fn forward(&self, hdr: MessageHeader) -> Result<()> {
        self.equeue
            .send(hdr)
            .await
            .map_err(|_| anyhow!("router {} is shut down", self.vrid))
    }

    /// Classify a message exactly the way the bypass handler does: local
    /// delivery when addressed to this router, egress otherwise.
    pub async fn dispatch(&self, hdr: MessageHeader) -> Result<()> {
        if hdr.dst == self.vrid {
            self.metrics.messages_delivered.increment();
            self.cqueue
                .send(hdr)
                .await
                .map_err(|_| anyhow!("router {} is shut down", self.vrid))
        } else {
            self.forward(hdr).await
        }
    }

    /// Full shortest path between two routers, when known.
    pub fn path(&self, src: VrId, dst: VrId) -> Option<&Vec<VrId>> {
        self.pathdict.get(&(src, dst))
    }

    /// Whether this router is the first interior hop of path(src,dst).
    pub fn is_edge(&self, src: VrId, dst: VrId) -> bool {
        is_edge(&self.pathdict, src, dst, self.vrid)
    }

    /// This router's direct neighbours.
    pub fn neighbours(&self) -> Vec<VrId> {
        self.topology.neighbours(self.vrid)
    }

    /// Current next hop toward a destination.
    pub async fn next_hop(&self, dst: VrId) -> Option<VrId> {
        self.rtable.read().await.get(&dst).copied()
    }

    pub fn metrics(&self) -> Arc<RouterMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// One virtual router instance.
pub struct Router {
    config: RouterConfig,
    handle: RouterHandle,
    links: Arc<RwLock<HashMap<VrId, Link>>>,
    peers: Arc<RwLock<HashMap<VrId, SocketAddr>>>,
    handlers: Vec<Box<dyn Strategy>>,
    // Receivers handed over to the loops at start().
    iqueue_rx: Option<mpsc::Receiver<MessageHeader>>,
    equeue_rx: Option<mpsc::Receiver<MessageHeader>>,
    cqueue_rx: Arc<Mutex<mpsc::Receiver<MessageHeader>>>,
    local_addr: Option<SocketAddr>,
}

impl Router {
    /// Build a router: computes routing state, allocates the queues.
    pub fn new(config: RouterConfig) -> Result<Self> {
        if !config.topology.contains(config.vrid) {
            return Err(anyhow!("vrid {} not present in topology", config.vrid));
        }

        let queue_size = if config.queue_size == 0 {
            DEFAULT_QUEUE_SIZE
        } else {
            config.queue_size
        };

        // The path dictionary is always built; cooperative strategies need
        // it even when the routing table itself comes from Dijkstra.
        let pathdict = Arc::new(config.topology.build_pathdict());
        let rtable = match config.routing {
            RoutingMode::Otf => config.topology.dijkstra(config.vrid),
            RoutingMode::Symmetric => config
                .topology
                .symmetric_routing_table(config.vrid, &pathdict),
        };
        info!(
            "router {}: routing table ready ({} destinations)",
            config.vrid,
            rtable.len()
        );

        let (itx, irx) = mpsc::channel(queue_size);
        let (etx, erx) = mpsc::channel(DEFAULT_QUEUE_SIZE);
        let (ctx_, crx) = mpsc::channel(DEFAULT_QUEUE_SIZE);

        let mut rid = [0u8; DIGEST_LEN];
        rand::thread_rng().fill(&mut rid);

        let handle = RouterHandle {
            vrid: config.vrid,
            rid: ChunkId(rid),
            topology: Arc::new(config.topology.clone()),
            pathdict,
            rtable: Arc::new(RwLock::new(rtable)),
            iqueue: itx,
            equeue: etx,
            cqueue: ctx_,
            metrics: Arc::new(RouterMetrics::new()),
        };

        let peers = config.peers.clone();
        Ok(Self {
            config,
            handle,
            links: Arc::new(RwLock::new(HashMap::new())),
            peers: Arc::new(RwLock::new(peers)),
            handlers: Vec::new(),
            iqueue_rx: Some(irx),
            equeue_rx: Some(erx),
            cqueue_rx: Arc::new(Mutex::new(crx)),
            local_addr: None,
        })
    }

    /// View used by strategies and locally-hosted applications.
    pub fn handle(&self) -> RouterHandle {
        self.handle.clone()
    }

    /// Register a handler ahead of the fixed bypass handler.
    pub fn register_handler(&mut self, handler: Box<dyn Strategy>) {
        self.handlers.push(handler);
    }

    /// Address the accept loop is bound to, available after [`Router::start`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Update the physical address of a logical neighbour.
    pub async fn update_peer(&self, vrid: VrId, addr: SocketAddr) {
        self.peers.write().await.insert(vrid, addr);
    }

    /// Detach the egress receiver so a test can observe forwarded frames
    /// without starting the pipeline loops.
    #[cfg(test)]
    pub(crate) fn take_egress(&mut self) -> mpsc::Receiver<MessageHeader> {
        self.equeue_rx.take().expect("egress receiver already taken")
    }

    /// Start every flow of control: accept loop, outbound link setup, the
    /// dispatch loop and the egress loop.
    pub async fn start(&mut self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.config.listen_addr))?;
        self.local_addr = Some(listener.local_addr()?);
        info!(
            "router {}: listening on {}",
            self.config.vrid,
            self.local_addr.unwrap()
        );

        self.spawn_accept_loop(listener);
        self.spawn_outbound_links();

        let (irx, erx) = match (self.iqueue_rx.take(), self.equeue_rx.take()) {
            (Some(irx), Some(erx)) => (irx, erx),
            _ => return Err(anyhow!("router already started")),
        };
        let handlers = std::mem::take(&mut self.handlers);

        self.spawn_dispatch_loop(irx, handlers);
        self.spawn_egress_loop(erx);
        Ok(())
    }

    /* ------------------------------------------------------------ *
     * Upper-application interface
     * ------------------------------------------------------------ */

    /// Send a message from the locally-hosted application.
    pub async fn send(&self, hdr: MessageHeader) -> Result<()> {
        self.handle.send(hdr).await
    }

    /// Receive the next message addressed to this router (blocking).
    pub async fn recv(&self) -> Option<MessageHeader> {
        self.cqueue_rx.lock().await.recv().await
    }

    /* ------------------------------------------------------------ *
     * Link establishment
     * ------------------------------------------------------------ */

    fn spawn_accept_loop(&self, listener: TcpListener) {
        let vrid = self.config.vrid;
        let topology = self.handle.topology.clone();
        let links = Arc::clone(&self.links);
        let ingress = self.handle.iqueue.clone();
        let metrics = Arc::clone(&self.handle.metrics);

        tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!("router {}: accept failed: {}", vrid, e);
                        continue;
                    }
                };
                // The first 4 bytes of a connection carry the peer's vrid.
                let mut stream = stream;
                let neighbour = match tokio::io::AsyncReadExt::read_u32(&mut stream).await {
                    Ok(n) => n as VrId,
                    Err(e) => {
                        warn!("router {}: bad hello from {}: {}", vrid, addr, e);
                        continue;
                    }
                };
                let props = match topology.link(neighbour, vrid) {
                    Some(p) => p.clone(),
                    None => {
                        warn!(
                            "router {}: rejecting {} — not a neighbour in the topology",
                            vrid, neighbour
                        );
                        continue;
                    }
                };
                debug!("router {}: link up from {} ({})", vrid, neighbour, addr);
                let link = Link::spawn(neighbour, props, stream, ingress.clone(), Arc::clone(&metrics));
                links.write().await.insert(neighbour, link);
            }
        });
    }

    fn spawn_outbound_links(&self) {
        // The smaller vrid dials; the larger side accepts. One TCP
        // connection per physical link.
        for neighbour in self.handle.neighbours() {
            if self.config.vrid < neighbour {
                let vrid = self.config.vrid;
                let props = self
                    .handle
                    .topology
                    .link(vrid, neighbour)
                    .cloned()
                    .unwrap_or_default();
                let peers = Arc::clone(&self.peers);
                let links = Arc::clone(&self.links);
                let ingress = self.handle.iqueue.clone();
                let metrics = Arc::clone(&self.handle.metrics);

                tokio::spawn(async move {
                    loop {
                        let jitter = rand::thread_rng().gen_range(100..500);
                        tokio::time::sleep(Duration::from_millis(jitter)).await;
                        let addr = match peers.read().await.get(&neighbour).copied() {
                            Some(a) => a,
                            None => {
                                debug!("router {}: no address for {} yet", vrid, neighbour);
                                continue;
                            }
                        };
                        match TcpStream::connect(addr).await {
                            Ok(mut stream) => {
                                if let Err(e) =
                                    tokio::io::AsyncWriteExt::write_u32(&mut stream, vrid as u32)
                                        .await
                                {
                                    warn!("router {}: hello to {} failed: {}", vrid, neighbour, e);
                                    continue;
                                }
                                debug!("router {}: link up to {} ({})", vrid, neighbour, addr);
                                let link = Link::spawn(
                                    neighbour,
                                    props.clone(),
                                    stream,
                                    ingress.clone(),
                                    Arc::clone(&metrics),
                                );
                                links.write().await.insert(neighbour, link);
                                break;
                            }
                            Err(e) => {
                                debug!("router {}: connect {} failed: {}", vrid, neighbour, e);
                            }
                        }
                    }
                });
            }
        }
    }

    /* ------------------------------------------------------------ *
     * Pipeline loops
     * ------------------------------------------------------------ */

    fn spawn_dispatch_loop(
        &self,
        mut iqueue: mpsc::Receiver<MessageHeader>,
        mut handlers: Vec<Box<dyn Strategy>>,
    ) {
        let handle = self.handle.clone();
        let ibandwidth = self.config.ibandwidth;

        tokio::spawn(async move {
            let mut shaper = Shaper::new(ibandwidth);
            while let Some(mut hdr) = iqueue.recv().await {
                shaper.throttle().await;
                shaper.charge(hdr.data.len() as u64);

                match hdr.msg_type {
                    MessageType::Request => handle.metrics.requests_seen.increment(),
                    MessageType::Response => handle.metrics.responses_seen.increment(),
                    _ => {}
                }

                let mut handled = false;
                for handler in handlers.iter_mut() {
                    match handler.handle(&mut hdr, &handle).await {
                        Ok(true) => {
                            handled = true;
                            break;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            // A failing handler never takes the loop down;
                            // the chain continues with the next handler.
                            handle.metrics.handler_errors.increment();
                            warn!(
                                "router {}: handler error (seq {} {} {}->{}): {}",
                                handle.vrid, hdr.seq, hdr.msg_type, hdr.src, hdr.dst, e
                            );
                        }
                    }
                }
                if handled {
                    continue;
                }

                // Fixed bypass handler: local delivery or transit.
                if let Err(e) = handle.dispatch(hdr).await {
                    warn!("router {}: dispatch: {}", handle.vrid, e);
                    break;
                }
            }
        });
    }

    fn spawn_egress_loop(&self, mut equeue: mpsc::Receiver<MessageHeader>) {
        let handle = self.handle.clone();
        let links = Arc::clone(&self.links);
        let ebandwidth = self.config.ebandwidth;

        tokio::spawn(async move {
            let mut shaper = Shaper::new(ebandwidth);
            while let Some(mut hdr) = equeue.recv().await {
                shaper.throttle().await;
                shaper.charge(hdr.data.len() as u64);

                let nexthop = if hdr.nxt != NXT_UNSET {
                    let n = hdr.nxt;
                    // The override is consumed at this hop.
                    hdr.nxt = NXT_UNSET;
                    Some(n)
                } else {
                    handle.rtable.read().await.get(&hdr.dst).copied()
                };

                let nexthop = match nexthop {
                    Some(n) => n,
                    None => {
                        handle.metrics.routing_failures.increment();
                        warn!(
                            "router {}: no route (seq {} {} {}->{}), dropping",
                            handle.vrid, hdr.seq, hdr.msg_type, hdr.src, hdr.dst
                        );
                        continue;
                    }
                };

                let link = links.read().await.get(&nexthop).cloned();
                match link {
                    Some(link) => {
                        handle.metrics.messages_forwarded.increment();
                        if !link.send(hdr).await {
                            warn!("router {}: link to {} is gone", handle.vrid, nexthop);
                        }
                    }
                    None => {
                        handle.metrics.messages_dropped.increment();
                        warn!(
                            "router {}: no link to next hop {} (seq {} {}->{}), dropping",
                            handle.vrid, nexthop, hdr.seq, hdr.src, hdr.dst
                        );
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_config(vrid: VrId) -> RouterConfig {
        let topo = Topology::parse("0 -> 1").unwrap();
        RouterConfig::new(vrid, topo, "127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn unknown_vrid_is_rejected() {
        let topo = Topology::parse("0 -> 1").unwrap();
        let cfg = RouterConfig::new(7, topo, "127.0.0.1:0".parse().unwrap());
        assert!(Router::new(cfg).is_err());
    }

    #[tokio::test]
    async fn local_messages_are_delivered_not_forwarded() {
        let mut router = Router::new(two_node_config(0)).unwrap();
        router.start().await.unwrap();

        let mut hdr = MessageHeader::new(MessageType::Alive);
        hdr.src = 0;
        hdr.dst = 0;
        router.send(hdr.clone()).await.unwrap();

        let got = router.recv().await.unwrap();
        assert_eq!(got.dst, 0);
        assert_eq!(got.msg_type, MessageType::Alive);
        assert_eq!(router.handle().metrics().messages_forwarded.value(), 0);
    }

    #[tokio::test]
    async fn transit_without_route_is_dropped() {
        // Router 0 in a partitioned topology: no path to 5.
        let topo = Topology::parse("0 -> 1\n5 -> 6").unwrap();
        let mut router =
            Router::new(RouterConfig::new(0, topo, "127.0.0.1:0".parse().unwrap())).unwrap();
        router.start().await.unwrap();

        let mut hdr = MessageHeader::new(MessageType::Request);
        hdr.src = 0;
        hdr.dst = 5;
        router.send(hdr).await.unwrap();

        // Give the pipeline a moment to classify and drop.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(router.handle().metrics().routing_failures.value(), 1);
    }
}
