//! WebSocket connection tracking and sid assignment.
//!
//! Every accepted connection gets a process-wide unique sid and an RAII
//! guard; the registry can force-close all connections for graceful
//! shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

struct ConnectionState {
    connected_at: Instant,
}

/// Tracks all live WebSocket connections and hands out sids.
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionState>,
    next_id: AtomicU64,
    /// Cancelled on force-close, then replaced so later connections still
    /// get a live token.
    shutdown: RwLock<CancellationToken>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
            shutdown: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a connection, assigning the next sid.
    ///
    /// Dropping the returned guard unregisters it.
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        let sid = format!("sid-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel_token = self.shutdown.read().child_token();

        self.connections.insert(
            sid.clone(),
            ConnectionState {
                connected_at: Instant::now(),
            },
        );
        log::info!(
            "[WS] Client connected: {} (total: {})",
            sid,
            self.connections.len()
        );

        ConnectionGuard {
            sid,
            registry: Arc::clone(self),
            cancel_token,
        }
    }

    fn unregister(&self, sid: &str) {
        if let Some((_, state)) = self.connections.remove(sid) {
            log::info!(
                "[WS] Client disconnected: {} after {:?} (remaining: {})",
                sid,
                state.connected_at.elapsed(),
                self.connections.len()
            );
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Signals every live connection to close and returns how many were
    /// signalled. New connections registered afterwards are unaffected.
    pub fn close_all(&self) -> usize {
        let count = self.connections.len();
        if count > 0 {
            log::info!("[WS] Force-closing {} connection(s)", count);
            let mut token = self.shutdown.write();
            token.cancel();
            *token = CancellationToken::new();
        }
        count
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one registered connection.
pub struct ConnectionGuard {
    sid: String,
    registry: Arc<ConnectionRegistry>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    /// The sid assigned to this connection.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Token fired when the registry force-closes connections.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.sid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sids_are_unique_and_sequential() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a.sid(), b.sid());
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn guard_drop_unregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        {
            let _guard = registry.register();
            assert_eq!(registry.connection_count(), 1);
        }
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn close_all_cancels_existing_tokens_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let old = registry.register();
        assert_eq!(registry.close_all(), 1);
        assert!(old.cancel_token().is_cancelled());

        let fresh = registry.register();
        assert!(!fresh.cancel_token().is_cancelled());
    }
}
