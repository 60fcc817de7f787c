//! Peer rotation.
//!
//! A user-saved peer is always tried first. After that the static list is
//! walked round-robin; each failed handshake advances to the next entry.

use brook_core::types::Peer;

#[derive(Debug, Clone)]
pub struct PeerRotation {
    peers: Vec<Peer>,
    saved: Option<Peer>,
    cursor: usize,
    saved_pending: bool,
}

impl PeerRotation {
    pub fn new(peers: Vec<Peer>, saved: Option<Peer>) -> Self {
        let saved_pending = saved.is_some();
        Self {
            peers,
            saved,
            cursor: 0,
            saved_pending,
        }
    }

    /// Next peer to try, or `None` if nothing is configured.
    pub fn next_peer(&mut self) -> Option<Peer> {
        if self.saved_pending {
            self.saved_pending = false;
            if let Some(saved) = &self.saved {
                return Some(saved.clone());
            }
        }
        if self.peers.is_empty() {
            // Only a saved peer: keep retrying it.
            return self.saved.clone();
        }
        let peer = self.peers[self.cursor % self.peers.len()].clone();
        self.cursor = (self.cursor + 1) % self.peers.len();
        Some(peer)
    }

    /// Start the next connect cycle from the saved peer again.
    pub fn restart(&mut self) {
        self.saved_pending = self.saved.is_some();
    }

    pub fn set_saved(&mut self, peer: Option<Peer>) {
        self.saved = peer;
        self.saved_pending = self.saved.is_some();
    }

    /// Distinct endpoints in rotation.
    pub fn len(&self) -> usize {
        self.peers.len() + usize::from(self.saved.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
