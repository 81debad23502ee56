//! The gossip mesh service.
//!
//! One reader and one writer task per connection. Outbound frames go
//! through a bounded per-peer queue that drops the oldest gossip on
//! overflow but never drops handshake or sync traffic. Idle links are
//! probed with pings and closed when the pong does not arrive.
//!
//! The connection API is transport-agnostic: TCP links are managed here;
//! the node's `/ws/p2p` endpoint registers WebSocket connections through
//! the same entry points.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use lib_crypto::{unix_now, NodeKeypair};
use lib_governance::GovernanceStore;
use lib_ledger::{AcceptResult, Block, BlockError, LedgerHandle, Transaction, TxError};

use crate::framing::{recv_framed, send_framed};
use crate::messages::{Envelope, NetMessage, PeerAddr};
use crate::peers::{AddressBook, PeerEvent, PeerInfo};
use crate::seen::SeenCache;

/// No traffic for this long triggers a ping.
const IDLE_TIMEOUT_SECS: u64 = 60;
/// A ping without a pong for this long closes the connection.
const PONG_TIMEOUT_SECS: u64 = 15;
/// Liveness check cadence.
const TICK_SECS: u64 = 5;
/// Dial timeout for outbound connections.
const DIAL_TIMEOUT_SECS: u64 = 15;
/// Per-peer outbound queue bound.
const OUTBOUND_QUEUE_CAPACITY: usize = 128;
/// Address-book sample size piggybacked on Hello.
const HELLO_PEER_SAMPLE: usize = 8;

/// Traffic classes for the overflow policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameClass {
    /// Handshakes, sync replies, pings. Never dropped.
    Control,
    /// Forwarded txs and blocks. Oldest dropped on overflow.
    Gossip,
}

/// Bounded outbound frame queue.
struct OutboundQueue {
    items: Mutex<VecDeque<(FrameClass, Vec<u8>)>>,
    notify: Notify,
    closed: AtomicBool,
}

impl OutboundQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push a frame, applying the overflow policy. Returns `false` when a
    /// gossip frame was dropped instead of queued.
    fn push(&self, class: FrameClass, bytes: Vec<u8>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut items = self.items.lock();
        if items.len() >= OUTBOUND_QUEUE_CAPACITY {
            if let Some(oldest_gossip) = items.iter().position(|(c, _)| *c == FrameClass::Gossip) {
                items.remove(oldest_gossip);
            } else if class == FrameClass::Gossip {
                return false;
            }
        }
        items.push_back((class, bytes));
        drop(items);
        self.notify.notify_one();
        true
    }

    async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            let notified = self.notify.notified();
            if let Some((_, bytes)) = self.items.lock().pop_front() {
                return Some(bytes);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

struct ConnState {
    conn_id: u64,
    queue: Arc<OutboundQueue>,
    node_id: Mutex<Option<String>>,
    said_hello: AtomicBool,
    last_rx: AtomicU64,
    /// Unix seconds of the outstanding ping, 0 when none.
    ping_sent: AtomicU64,
    remote_desc: String,
}

/// Handle owned by a connection's writer task.
#[derive(Clone)]
pub struct ConnectionHandle {
    state: Arc<ConnState>,
}

impl ConnectionHandle {
    /// Await the next frame to write, or `None` once the connection closes.
    pub async fn next_outbound(&self) -> Option<Vec<u8>> {
        self.state.queue.pop().await
    }

    pub fn close(&self) {
        self.state.queue.close();
    }
}

/// Mesh configuration.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// TCP listen address, e.g. `0.0.0.0:6430`.
    pub listen_addr: String,
    /// Address advertised to peers in Hello messages.
    pub advertise_addr: String,
    /// Static bootstrap peers, `host:port`.
    pub seed_nodes: Vec<String>,
    /// `peers.json` location; `None` keeps the book in memory.
    pub peers_path: Option<PathBuf>,
}

struct MeshInner {
    keypair: Arc<NodeKeypair>,
    ledger: LedgerHandle,
    governance: GovernanceStore,
    config: MeshConfig,
    book: Mutex<AddressBook>,
    seen: Mutex<SeenCache>,
    connections: Mutex<HashMap<u64, Arc<ConnState>>>,
    by_node: Mutex<HashMap<String, u64>>,
    next_conn_id: AtomicU64,
    nonce: AtomicU64,
}

/// The mesh service. Cheap to clone.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

impl Mesh {
    pub fn new(
        keypair: Arc<NodeKeypair>,
        ledger: LedgerHandle,
        governance: GovernanceStore,
        config: MeshConfig,
    ) -> Self {
        let book = match &config.peers_path {
            Some(path) => AddressBook::load(path),
            None => AddressBook::new(),
        };
        Self {
            inner: Arc::new(MeshInner {
                keypair,
                ledger,
                governance,
                config,
                book: Mutex::new(book),
                seen: Mutex::new(SeenCache::default()),
                connections: Mutex::new(HashMap::new()),
                by_node: Mutex::new(HashMap::new()),
                next_conn_id: AtomicU64::new(1),
                nonce: AtomicU64::new(1),
            }),
        }
    }

    /// Bind the listener, dial the seeds and start the liveness ticker.
    /// Returns the bound listen address.
    pub async fn start(&self) -> Result<std::net::SocketAddr> {
        let listener = TcpListener::bind(&self.inner.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind p2p listener {}", self.inner.config.listen_addr))?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "p2p mesh listening");

        let mesh = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "inbound p2p connection");
                        mesh.clone().spawn_tcp(stream, addr.to_string());
                    }
                    Err(e) => {
                        warn!(error = %e, "p2p accept failed");
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                }
            }
        });

        for seed in self.inner.config.seed_nodes.clone() {
            let mesh = self.clone();
            tokio::spawn(async move {
                if let Err(e) = mesh.dial(&seed).await {
                    warn!(seed = %seed, error = %e, "seed dial failed");
                }
            });
        }

        let mesh = self.clone();
        tokio::spawn(async move { mesh.liveness_loop().await });
        Ok(local_addr)
    }

    /// Dial a peer and attach it to the mesh.
    pub async fn dial(&self, addr: &str) -> Result<()> {
        let stream = tokio::time::timeout(
            Duration::from_secs(DIAL_TIMEOUT_SECS),
            TcpStream::connect(addr),
        )
        .await
        .with_context(|| format!("dial timeout to {addr}"))??;
        self.clone().spawn_tcp(stream, addr.to_string());
        Ok(())
    }

    fn spawn_tcp(self, stream: TcpStream, remote_desc: String) {
        let handle = self.register_connection(remote_desc);
        let (mut read_half, mut write_half) = stream.into_split();

        // writer
        let writer_handle = handle.clone();
        tokio::spawn(async move {
            while let Some(frame) = writer_handle.next_outbound().await {
                if send_framed(&mut write_half, &frame).await.is_err() {
                    break;
                }
            }
            writer_handle.close();
        });

        // reader
        let mesh = self.clone();
        let reader_handle = handle.clone();
        tokio::spawn(async move {
            loop {
                match recv_framed(&mut read_half).await {
                    Ok(raw) => mesh.handle_incoming(&reader_handle, &raw).await,
                    Err(_) => break,
                }
            }
            mesh.connection_closed(&reader_handle);
        });

        self.send_hello(&handle);
    }

    /// Register a transport-managed connection (used by TCP here and by the
    /// node's WebSocket endpoint).
    pub fn register_connection(&self, remote_desc: String) -> ConnectionHandle {
        let conn_id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(ConnState {
            conn_id,
            queue: Arc::new(OutboundQueue::new()),
            node_id: Mutex::new(None),
            said_hello: AtomicBool::new(false),
            last_rx: AtomicU64::new(unix_now()),
            ping_sent: AtomicU64::new(0),
            remote_desc,
        });
        self.inner.connections.lock().insert(conn_id, state.clone());
        ConnectionHandle { state }
    }

    /// Tear down a connection (reader saw EOF or the transport failed).
    pub fn connection_closed(&self, handle: &ConnectionHandle) {
        handle.state.queue.close();
        self.inner.connections.lock().remove(&handle.state.conn_id);
        if let Some(node_id) = handle.state.node_id.lock().clone() {
            let mut by_node = self.inner.by_node.lock();
            if by_node.get(&node_id) == Some(&handle.state.conn_id) {
                by_node.remove(&node_id);
            }
            debug!(peer = %node_id, "peer disconnected");
        }
    }

    /// Greet a freshly attached connection.
    pub fn send_hello(&self, handle: &ConnectionHandle) {
        handle.state.said_hello.store(true, Ordering::Release);
        let snapshot = self.inner.ledger.snapshot();
        let known_peers = self
            .inner
            .book
            .lock()
            .sample(HELLO_PEER_SAMPLE)
            .into_iter()
            .map(|p| PeerAddr {
                node_id: p.node_id,
                address: p.address,
            })
            .collect();
        let hello = NetMessage::Hello {
            node_id: self.inner.keypair.node_id(),
            listen_addr: self.inner.config.advertise_addr.clone(),
            head_height: snapshot.height,
            head_hash: snapshot.tip_hash.clone(),
            known_peers,
        };
        self.queue_to(handle, hello, FrameClass::Control);
    }

    /// Decode, authenticate and dispatch one inbound frame.
    pub async fn handle_incoming(&self, handle: &ConnectionHandle, raw: &[u8]) {
        handle.state.last_rx.store(unix_now(), Ordering::Relaxed);

        let envelope: Envelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "undecodable frame");
                self.record_peer_event(handle, PeerEvent::ProtocolViolation);
                return;
            }
        };
        if !envelope.verify() {
            warn!(sender = %envelope.sender, "envelope signature invalid");
            self.record_peer_event(handle, PeerEvent::ProtocolViolation);
            return;
        }
        self.dispatch(handle, envelope).await;
    }

    async fn dispatch(&self, handle: &ConnectionHandle, envelope: Envelope) {
        let sender = envelope.sender.clone();
        let hop_count = envelope.hop_count;
        match envelope.msg {
            NetMessage::Hello {
                node_id,
                listen_addr,
                head_height,
                head_hash: _,
                known_peers,
            } => {
                if node_id != sender {
                    self.record_peer_event(handle, PeerEvent::ProtocolViolation);
                    return;
                }
                {
                    let mut book = self.inner.book.lock();
                    book.upsert(&node_id, &listen_addr);
                    for peer in known_peers {
                        if peer.node_id != self.inner.keypair.node_id() {
                            book.upsert(&peer.node_id, &peer.address);
                        }
                    }
                }
                *handle.state.node_id.lock() = Some(node_id.clone());
                self.inner
                    .by_node
                    .lock()
                    .insert(node_id.clone(), handle.state.conn_id);
                info!(peer = %&node_id[..node_id.len().min(12)], head_height, "peer handshake");

                if !handle.state.said_hello.swap(true, Ordering::AcqRel) {
                    self.send_hello(handle);
                }

                let ours = self.inner.ledger.snapshot().height;
                if head_height > ours {
                    self.request_blocks(handle, ours + 1);
                }
            }
            NetMessage::GetBlocks { from_height, limit } => {
                let batch = self.inner.governance.snapshot().sync_batch;
                let limit = limit.min(batch).max(1) as usize;
                let snapshot = self.inner.ledger.snapshot();
                let blocks: Vec<Block> = snapshot
                    .blocks_from(from_height, limit)
                    .iter()
                    .map(|b| (**b).clone())
                    .collect();
                self.queue_to(handle, NetMessage::Blocks { blocks }, FrameClass::Control);
            }
            NetMessage::Blocks { blocks } => {
                self.apply_sync_blocks(handle, blocks).await;
            }
            NetMessage::NewTx { tx } => {
                self.handle_new_tx(handle, tx, hop_count).await;
            }
            NetMessage::NewBlock { block } => {
                self.handle_new_block(handle, block, hop_count).await;
            }
            NetMessage::Ping { nonce } => {
                self.queue_to(handle, NetMessage::Pong { nonce }, FrameClass::Control);
            }
            NetMessage::Pong { .. } => {
                handle.state.ping_sent.store(0, Ordering::Relaxed);
            }
        }
    }

    async fn apply_sync_blocks(&self, handle: &ConnectionHandle, blocks: Vec<Block>) {
        if blocks.is_empty() {
            return;
        }
        let batch = self.inner.governance.snapshot().sync_batch as usize;
        let count = blocks.len();
        let last_height = blocks.last().map(|b| b.height).unwrap_or(0);
        let mut failures = 0usize;
        for block in blocks {
            match self.inner.ledger.accept_block(block).await {
                Ok(_) => {}
                Err(BlockError::WorkerUnavailable) => return,
                Err(e) => {
                    debug!(error = %e, "sync block rejected");
                    failures += 1;
                }
            }
        }
        if failures == count {
            // a chain that consistently fails validation
            self.record_peer_event(handle, PeerEvent::BadChain);
            return;
        }
        self.record_peer_event(handle, PeerEvent::GoodMessage);
        if count == batch {
            // probably more to fetch
            self.request_blocks(handle, last_height + 1);
        }
    }

    async fn handle_new_tx(&self, handle: &ConnectionHandle, tx: Transaction, hop_count: u8) {
        let gossip_id = format!("tx:{}", tx.id);
        if !self.inner.seen.lock().insert(&gossip_id) {
            return;
        }
        match self.inner.ledger.submit_tx(tx.clone()).await {
            Ok(()) => {
                self.record_peer_event(handle, PeerEvent::GoodMessage);
                self.forward(NetMessage::NewTx { tx }, Some(handle.state.conn_id), hop_count + 1);
            }
            Err(TxError::DuplicateTx(_)) | Err(TxError::Backpressure) => {}
            Err(e) => {
                debug!(error = %e, "gossiped tx rejected");
                self.record_peer_event(handle, PeerEvent::BadMessage);
            }
        }
    }

    async fn handle_new_block(&self, handle: &ConnectionHandle, block: Block, hop_count: u8) {
        let gossip_id = format!("block:{}", block.hash());
        if !self.inner.seen.lock().insert(&gossip_id) {
            return;
        }
        match self.inner.ledger.accept_block(block.clone()).await {
            Ok(AcceptResult::AlreadyKnown) => {}
            Ok(_) => {
                self.record_peer_event(handle, PeerEvent::GoodMessage);
                self.forward(
                    NetMessage::NewBlock { block },
                    Some(handle.state.conn_id),
                    hop_count + 1,
                );
            }
            Err(BlockError::UnknownParent(_)) => {
                // we are behind; pull the gap from this peer
                let ours = self.inner.ledger.snapshot().height;
                self.request_blocks(handle, ours + 1);
            }
            Err(BlockError::WorkerUnavailable) => {}
            Err(e) => {
                debug!(error = %e, "gossiped block rejected");
                self.record_peer_event(handle, PeerEvent::BadMessage);
            }
        }
    }

    /// Announce a locally submitted transaction.
    pub fn broadcast_tx(&self, tx: Transaction) {
        self.inner.seen.lock().insert(&format!("tx:{}", tx.id));
        self.forward(NetMessage::NewTx { tx }, None, 1);
    }

    /// Announce a locally sealed block.
    pub fn broadcast_block(&self, block: Block) {
        self.inner.seen.lock().insert(&format!("block:{}", block.hash()));
        self.forward(NetMessage::NewBlock { block }, None, 1);
    }

    /// Forward gossip to every connection except the source, re-sealed under
    /// our key with the incremented hop count.
    fn forward(&self, msg: NetMessage, from_conn: Option<u64>, hop_count: u8) {
        let max_hops = self.inner.governance.snapshot().max_hops;
        if hop_count > max_hops {
            return;
        }
        let nonce = self.inner.nonce.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::seal(&self.inner.keypair, msg, nonce, hop_count);
        let Ok(bytes) = serde_json::to_vec(&envelope) else {
            return;
        };

        let connections: Vec<Arc<ConnState>> =
            self.inner.connections.lock().values().cloned().collect();
        let book = self.inner.book.lock();
        for state in connections {
            if Some(state.conn_id) == from_conn {
                continue;
            }
            if let Some(node_id) = state.node_id.lock().as_ref() {
                if book.is_greylisted(node_id) {
                    continue;
                }
            }
            state.queue.push(FrameClass::Gossip, bytes.clone());
        }
    }

    fn request_blocks(&self, handle: &ConnectionHandle, from_height: u64) {
        let batch = self.inner.governance.snapshot().sync_batch;
        self.queue_to(
            handle,
            NetMessage::GetBlocks {
                from_height,
                limit: batch,
            },
            FrameClass::Control,
        );
    }

    fn queue_to(&self, handle: &ConnectionHandle, msg: NetMessage, class: FrameClass) {
        let nonce = self.inner.nonce.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::seal(&self.inner.keypair, msg, nonce, 0);
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            handle.state.queue.push(class, bytes);
        }
    }

    fn record_peer_event(&self, handle: &ConnectionHandle, event: PeerEvent) {
        if let Some(node_id) = handle.state.node_id.lock().as_ref() {
            self.inner.book.lock().record_event(node_id, event);
        }
    }

    /// Current peer table for the API.
    pub fn peer_list(&self) -> Vec<PeerInfo> {
        self.inner.book.lock().list()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    async fn liveness_loop(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(TICK_SECS));
        loop {
            ticker.tick().await;
            let now = unix_now();
            let connections: Vec<Arc<ConnState>> =
                self.inner.connections.lock().values().cloned().collect();
            for state in connections {
                let ping_sent = state.ping_sent.load(Ordering::Relaxed);
                if ping_sent != 0 && now.saturating_sub(ping_sent) > PONG_TIMEOUT_SECS {
                    warn!(remote = %state.remote_desc, "pong timeout, closing connection");
                    self.connection_closed(&ConnectionHandle { state });
                    continue;
                }
                let idle = now.saturating_sub(state.last_rx.load(Ordering::Relaxed));
                if idle > IDLE_TIMEOUT_SECS && ping_sent == 0 {
                    state.ping_sent.store(now, Ordering::Relaxed);
                    let handle = ConnectionHandle { state };
                    self.queue_to(
                        &handle,
                        NetMessage::Ping { nonce: now },
                        FrameClass::Control,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_overflow_drops_oldest_gossip() {
        let queue = OutboundQueue::new();
        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            assert!(queue.push(FrameClass::Gossip, vec![i as u8]));
        }
        // overflow: oldest gossip (0) is dropped, new frame enters
        assert!(queue.push(FrameClass::Gossip, vec![0xFF]));
        let items = queue.items.lock();
        assert_eq!(items.len(), OUTBOUND_QUEUE_CAPACITY);
        assert_eq!(items.front().unwrap().1, vec![1u8]);
        assert_eq!(items.back().unwrap().1, vec![0xFF]);
    }

    #[test]
    fn test_queue_never_drops_control() {
        let queue = OutboundQueue::new();
        for _ in 0..OUTBOUND_QUEUE_CAPACITY {
            queue.push(FrameClass::Control, vec![0]);
        }
        // a full all-control queue refuses new gossip
        assert!(!queue.push(FrameClass::Gossip, vec![1]));
        // but accepts further control
        assert!(queue.push(FrameClass::Control, vec![2]));
        assert_eq!(queue.items.lock().len(), OUTBOUND_QUEUE_CAPACITY + 1);
    }

    #[tokio::test]
    async fn test_queue_pop_and_close() {
        let queue = Arc::new(OutboundQueue::new());
        queue.push(FrameClass::Control, b"x".to_vec());
        assert_eq!(queue.pop().await.unwrap(), b"x");

        let waiter = queue.clone();
        let task = tokio::spawn(async move { waiter.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert_eq!(task.await.unwrap(), None);
    }
}
