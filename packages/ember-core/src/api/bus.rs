//! Peer routing for the sync bus.
//!
//! Each connected client owns one outbound event channel, registered by sid.
//! Broadcast and unicast are just fan-out over these channels; per-peer
//! channels are FIFO, so events reach each client in emission order.

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;

/// Routes server events to connected peers by sid.
#[derive(Default)]
pub struct SyncBus {
    peers: DashMap<String, mpsc::UnboundedSender<ServerEvent>>,
}

impl SyncBus {
    /// Creates a bus with no peers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer and returns the receiving end of its outbound queue.
    pub fn register(&self, sid: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(sid.to_string(), tx);
        rx
    }

    /// Removes a peer; any events still queued for it are dropped with it.
    pub fn unregister(&self, sid: &str) {
        self.peers.remove(sid);
    }

    /// Sends one event to one peer. Silently drops if the peer is gone;
    /// in-flight replies to a disconnected client go nowhere.
    pub fn unicast(&self, sid: &str, event: ServerEvent) {
        if let Some(peer) = self.peers.get(sid) {
            let _ = peer.send(event);
        }
    }

    /// Sends one event to every listed sid.
    pub fn send_to_all(&self, sids: &[String], event: &ServerEvent) {
        for sid in sids {
            if let Some(peer) = self.peers.get(sid) {
                let _ = peer.send(event.clone());
            }
        }
    }

    /// Number of connected peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_reaches_registered_peer() {
        let bus = SyncBus::new();
        let mut rx = bus.register("sid-1");
        bus.unicast(
            "sid-1",
            ServerEvent::RoomCreated {
                room_code: "ABC123".into(),
            },
        );
        match rx.try_recv().unwrap() {
            ServerEvent::RoomCreated { room_code } => assert_eq!(room_code, "ABC123"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn unicast_to_unknown_peer_is_dropped() {
        let bus = SyncBus::new();
        // Must not panic.
        bus.unicast(
            "ghost",
            ServerEvent::UserLeft {
                username: "x".into(),
            },
        );
    }

    #[test]
    fn broadcast_preserves_emission_order_per_peer() {
        let bus = SyncBus::new();
        let mut rx = bus.register("sid-1");
        let sids = vec!["sid-1".to_string()];
        for i in 0..3 {
            bus.send_to_all(
                &sids,
                &ServerEvent::CurrentIndexSynced {
                    room_code: "R".into(),
                    current_idx: i,
                    updated_by: "server".into(),
                },
            );
        }
        for expected in 0..3 {
            match rx.try_recv().unwrap() {
                ServerEvent::CurrentIndexSynced { current_idx, .. } => {
                    assert_eq!(current_idx, expected)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn unregister_drops_queued_events() {
        let bus = SyncBus::new();
        let rx = bus.register("sid-1");
        bus.unregister("sid-1");
        assert_eq!(bus.peer_count(), 0);
        drop(rx);
    }
}
