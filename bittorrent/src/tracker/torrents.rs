use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{atomic::{AtomicBool, AtomicU64, Ordering}, Arc},
    time::{Duration, Instant},
};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::Instrument;
use crate::ID;
use super::Event;

const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedPeer {

    pub peer_id: ID,

    pub address: SocketAddr,

    pub uploaded: u64,

    pub downloaded: u64,

    pub left: u64,

    pub last_announce: Instant,

}

impl TrackedPeer {
    pub fn is_seeder(&self) -> bool {
        self.left == 0
    }
}

// What a peer reported in one announce.
#[derive(Debug, Clone, Copy)]
pub struct AnnouncedPeer {

    pub peer_id: ID,

    pub address: SocketAddr,

    pub uploaded: u64,

    pub downloaded: u64,

    pub left: u64,

    pub event: Option<Event>,

}

#[derive(Debug)]
pub struct TrackedTorrent {

    info_hash: ID,

    peers: RwLock<HashMap<ID, TrackedPeer>>,

}

impl TrackedTorrent {

    pub fn new(info_hash: ID) -> Self {
        Self {
            info_hash,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn info_hash(&self) -> ID {
        self.info_hash
    }

    pub fn hex_info_hash(&self) -> String {
        hex::encode(self.info_hash)
    }

    // A stopped event removes the peer, anything else refreshes it.
    pub fn update(&self, announce: AnnouncedPeer, now: Instant) -> Option<TrackedPeer> {
        let mut peers = self.peers.write();
        if announce.event == Some(Event::Stopped) {
            peers.remove(&announce.peer_id);
            return None;
        }
        let peer = TrackedPeer {
            peer_id: announce.peer_id,
            address: announce.address,
            uploaded: announce.uploaded,
            downloaded: announce.downloaded,
            left: announce.left,
            last_announce: now,
        };
        peers.insert(announce.peer_id, peer.clone());
        Some(peer)
    }

    pub fn peers(&self) -> Vec<TrackedPeer> {
        self.peers.read().values().cloned().collect()
    }

    pub fn seeders(&self) -> usize {
        self.peers.read().values().filter(|peer| peer.is_seeder()).count()
    }

    pub fn leechers(&self) -> usize {
        self.peers.read().values().filter(|peer| !peer.is_seeder()).count()
    }

    // Drops peers that have not announced within `expire`.
    pub fn collect_expired(&self, expire: Duration, now: Instant) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|_, peer| now.saturating_duration_since(peer.last_announce) <= expire);
        before - peers.len()
    }
}

// Torrents known to this tracker, keyed by hex info hash.
#[derive(Debug)]
pub struct TrackedTorrents {

    torrents: RwLock<HashMap<String, Arc<TrackedTorrent>>>,

    // Track torrents on first announce instead of requiring registration.
    accept_foreign: AtomicBool,

    announce_interval: AtomicU64,

}

impl Default for TrackedTorrents {
    fn default() -> Self {
        Self {
            torrents: RwLock::new(HashMap::new()),
            accept_foreign: AtomicBool::new(false),
            announce_interval: AtomicU64::new(DEFAULT_ANNOUNCE_INTERVAL.as_secs()),
        }
    }
}

impl TrackedTorrents {

    pub fn new() -> Self {
        Self::default()
    }

    // Registers a torrent. If the hash is already tracked the existing entry
    // is returned instead.
    pub fn announce(&self, torrent: TrackedTorrent) -> Arc<TrackedTorrent> {
        let hash = torrent.hex_info_hash();
        let mut torrents = self.torrents.write();
        if let Some(existing) = torrents.get(&hash) {
            tracing::warn!("tracker already announced torrent with hash {}", hash);
            return existing.clone();
        }
        let torrent = Arc::new(torrent);
        torrents.insert(hash.clone(), torrent.clone());
        tracing::info!("registered new torrent with hash {}", hash);
        torrent
    }

    pub fn remove(&self, info_hash: &ID) -> bool {
        self.torrents.write().remove(&hex::encode(info_hash)).is_some()
    }

    pub fn get(&self, hex_info_hash: &str) -> Option<Arc<TrackedTorrent>> {
        self.torrents.read().get(hex_info_hash).cloned()
    }

    // The torrent an announce is for, tracked on the spot when foreign
    // torrents are accepted.
    pub fn get_or_track(&self, info_hash: ID) -> Option<Arc<TrackedTorrent>> {
        if let Some(torrent) = self.get(&hex::encode(info_hash)) {
            return Some(torrent);
        }
        if self.accepts_foreign() {
            Some(self.announce(TrackedTorrent::new(info_hash)))
        } else {
            None
        }
    }

    pub fn torrents(&self) -> Vec<Arc<TrackedTorrent>> {
        self.torrents.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.torrents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.torrents.read().is_empty()
    }

    pub fn accepts_foreign(&self) -> bool {
        self.accept_foreign.load(Ordering::Relaxed)
    }

    pub fn set_accept_foreign(&self, accept: bool) {
        self.accept_foreign.store(accept, Ordering::Relaxed);
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval.load(Ordering::Relaxed))
    }

    pub fn set_announce_interval(&self, interval: Duration) {
        self.announce_interval.store(interval.as_secs(), Ordering::Relaxed);
    }

    pub fn collect_expired(&self, expire: Duration) -> usize {
        let now = Instant::now();
        self.torrents()
            .iter()
            .map(|torrent| torrent.collect_expired(expire, now))
            .sum()
    }

    // Periodically drops peers that stopped announcing. The task ends once the
    // registry is dropped.
    pub fn spawn_peer_collector(self: &Arc<Self>, interval: Duration, expire: Duration) -> JoinHandle<()> {
        let torrents = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(torrents) = torrents.upgrade() else {
                    break;
                };
                let collected = torrents.collect_expired(expire);
                if collected > 0 {
                    tracing::debug!("collected {} expired peers", collected);
                }
            }
        }.instrument(tracing::info_span!("peer collector")))
    }
}
