//! Simulated link between two adjacent routers.
//!
//! A [`Link`] wraps one transport connection and models the physical wire:
//! bandwidth shaping, one-way delay and random loss are all applied on the
//! ingress side, because they are properties of the wire rather than of the
//! sender. Egress simply drains the link's private queue in order.

use crate::topology::LinkProps;
use crate::{DEFAULT_QUEUE_SIZE, SHAPING_STALL_MS};
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use vrouter_common::metrics::RouterMetrics;
use vrouter_common::wire::{read_frame, write_frame, MessageHeader};

/* ---------------------------------------------------------------- *
 * Token-bucket shaping
 * ---------------------------------------------------------------- */

/// Byte budget per one-second window; exhausting it stalls the flow
/// briefly instead of dropping traffic.
#[derive(Debug)]
pub(crate) struct Shaper {
    budget: Option<u64>,
    used: u64,
    window: Instant,
}

impl Shaper {
    pub(crate) fn new(budget: Option<u64>) -> Self {
        Self {
            budget,
            used: 0,
            window: Instant::now(),
        }
    }

    /// Stall while the current window's budget is exhausted.
    pub(crate) async fn throttle(&mut self) {
        let threshold = match self.budget {
            Some(t) => t,
            None => return,
        };
        loop {
            if self.window.elapsed() >= Duration::from_secs(1) {
                self.window = Instant::now();
                self.used = 0;
            }
            if self.used < threshold {
                return;
            }
            tokio::time::sleep(Duration::from_millis(SHAPING_STALL_MS)).await;
        }
    }

    /// Account for bytes that just passed through.
    pub(crate) fn charge(&mut self, bytes: u64) {
        if self.budget.is_some() {
            self.used = self.used.saturating_add(bytes);
        }
    }
}

/* ---------------------------------------------------------------- *
 * Link
 * ---------------------------------------------------------------- */

/// Handle to a running link; the router enqueues outgoing messages here.
#[derive(Debug, Clone)]
pub struct Link {
    peer: i32,
    equeue: mpsc::Sender<MessageHeader>,
}

impl Link {
    /// Spawn the ingress and egress flows for an established connection.
    ///
    /// `ingress` is the router's shared ingress queue that every link
    /// feeds; messages surviving the wire model are pushed there, blocking
    /// when the router is saturated.
    pub fn spawn(
        peer: i32,
        props: LinkProps,
        stream: TcpStream,
        ingress: mpsc::Sender<MessageHeader>,
        metrics: Arc<RouterMetrics>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::spawn_on(peer, props, read_half, write_half, ingress, metrics)
    }

    /// Transport-generic variant of [`Link::spawn`], used by the in-process
    /// tests with duplex pipes.
    pub fn spawn_on<R, W>(
        peer: i32,
        props: LinkProps,
        read_half: R,
        write_half: W,
        ingress: mpsc::Sender<MessageHeader>,
        metrics: Arc<RouterMetrics>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (etx, erx) = mpsc::channel(DEFAULT_QUEUE_SIZE);

        tokio::spawn(link_ingress(
            peer,
            props,
            read_half,
            ingress,
            Arc::clone(&metrics),
        ));
        tokio::spawn(link_egress(peer, write_half, erx, metrics));

        Self { peer, equeue: etx }
    }

    /// Neighbour on the far end of this link.
    pub fn peer(&self) -> i32 {
        self.peer
    }

    /// Queue a message for transmission, blocking while the queue is full.
    pub async fn send(&self, hdr: MessageHeader) -> bool {
        self.equeue.send(hdr).await.is_ok()
    }
}

/// Ingress flow: frame reads, bandwidth cap, delay, loss, then the shared
/// router queue.
async fn link_ingress<R>(
    peer: i32,
    props: LinkProps,
    mut conn: R,
    ingress: mpsc::Sender<MessageHeader>,
    metrics: Arc<RouterMetrics>,
) where
    R: AsyncRead + Unpin,
{
    let mut shaper = Shaper::new(props.bandwidth);
    let delay = Duration::from_secs_f64(props.delay);
    let mut last = Instant::now();

    loop {
        shaper.throttle().await;

        let hdr = match read_frame(&mut conn).await {
            Ok(hdr) => hdr,
            Err(e) => {
                debug!("link {}: ingress closed: {}", peer, e);
                break;
            }
        };
        metrics.frames_in.increment();
        metrics.bytes_in.add(hdr.wire_size() as u64);
        shaper.charge(hdr.data.len() as u64);

        // Residual delay: only the part of the budget the inter-arrival
        // gap has not already covered is slept off.
        if !delay.is_zero() {
            let since = last.elapsed();
            if since < delay {
                tokio::time::sleep(delay - since).await;
            }
            last = Instant::now();
        }

        if props.lossrate > 0.0 && rand::random::<f64>() < props.lossrate {
            metrics.frames_lost.increment();
            continue;
        }

        if ingress.send(hdr).await.is_err() {
            // Router shut down.
            break;
        }
    }
}

/// Egress flow: drain the private queue and write frames in enqueue order.
async fn link_egress<W>(
    peer: i32,
    mut conn: W,
    mut equeue: mpsc::Receiver<MessageHeader>,
    metrics: Arc<RouterMetrics>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(hdr) = equeue.recv().await {
        let size = hdr.wire_size() as u64;
        if let Err(e) = write_frame(&mut conn, &hdr).await {
            warn!("link {}: egress write failed: {}", peer, e);
            break;
        }
        metrics.frames_out.increment();
        metrics.bytes_out.add(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use vrouter_common::types::MessageType;

    fn msg(seq: u32, payload: &'static [u8]) -> MessageHeader {
        let mut hdr = MessageHeader::new(MessageType::Request);
        hdr.seq = seq;
        hdr.data = Bytes::from_static(payload);
        hdr
    }

    #[tokio::test]
    async fn frames_cross_the_link_in_order() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, _a_write) = tokio::io::split(a);
        let (_b_read, b_write) = tokio::io::split(b);
        let metrics = Arc::new(RouterMetrics::new());
        let (itx, mut irx) = mpsc::channel(16);

        // Receiving side of the wire.
        let _ingress_only = Link::spawn_on(
            1,
            LinkProps::default(),
            a_read,
            tokio::io::sink(),
            itx,
            Arc::clone(&metrics),
        );
        // Sending side of the wire.
        let (sink_tx, _sink_rx) = mpsc::channel(1);
        let egress_only = Link::spawn_on(
            0,
            LinkProps::default(),
            tokio::io::empty(),
            b_write,
            sink_tx,
            Arc::clone(&metrics),
        );

        for seq in 0..5 {
            assert!(egress_only.send(msg(seq, b"chunk")).await);
        }
        for seq in 0..5 {
            let got = irx.recv().await.unwrap();
            assert_eq!(got.seq, seq);
            assert_eq!(&got.data[..], b"chunk");
        }
        assert_eq!(metrics.frames_in.value(), 5);
        assert_eq!(metrics.frames_out.value(), 5);
    }

    #[tokio::test]
    async fn total_loss_discards_everything() {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, _aw) = tokio::io::split(a);
        let (_br, b_write) = tokio::io::split(b);
        let metrics = Arc::new(RouterMetrics::new());
        let (itx, mut irx) = mpsc::channel(16);

        let props = LinkProps {
            lossrate: 1.0,
            ..LinkProps::default()
        };
        let _rx_side = Link::spawn_on(1, props, a_read, tokio::io::sink(), itx, Arc::clone(&metrics));
        let (sink_tx, _sink_rx) = mpsc::channel(1);
        let tx_side = Link::spawn_on(
            0,
            LinkProps::default(),
            tokio::io::empty(),
            b_write,
            sink_tx,
            Arc::clone(&metrics),
        );

        for seq in 0..10 {
            assert!(tx_side.send(msg(seq, b"x")).await);
        }
        tokio::time::timeout(Duration::from_millis(200), irx.recv())
            .await
            .expect_err("lossrate 1.0 must drop every frame");
        assert_eq!(metrics.frames_lost.value(), 10);
    }

    #[tokio::test]
    async fn shaper_without_budget_never_stalls() {
        let mut shaper = Shaper::new(None);
        shaper.charge(u64::MAX);
        // Returns immediately.
        tokio::time::timeout(Duration::from_millis(50), shaper.throttle())
            .await
            .unwrap();
    }
}
