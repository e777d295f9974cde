// =============================================================================
// Per-user WebSocket broadcast groups
// =============================================================================
//
// Each connected user gets its own `tokio::sync::broadcast` channel, keyed by
// `user_id`, mirroring the `user_{id}` channel-layer groups the original
// Django Channels consumer joined. Publishing to a group that currently has
// no subscribers is a harmless no-op — `broadcast::Sender::send` only fails
// when there are zero receivers, and callers treat that as "nobody is
// listening right now", not an error.
// =============================================================================

use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;

use crate::types::ScannerWsMessage;

const GROUP_CAPACITY: usize = 64;

#[derive(Default)]
pub struct WsGroups {
    groups: RwLock<HashMap<i64, broadcast::Sender<ScannerWsMessage>>>,
}

impl WsGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `user_id`'s group, creating it if this is the first
    /// subscriber. The returned receiver only sees messages sent after this
    /// call.
    pub fn subscribe(&self, user_id: i64) -> broadcast::Receiver<ScannerWsMessage> {
        let mut groups = self.groups.write();
        groups
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(GROUP_CAPACITY).0)
            .subscribe()
    }

    /// Send `msg` to every connection currently subscribed to `user_id`'s
    /// group. Best-effort: if nobody is listening, the message is dropped.
    pub fn send_to_user(&self, user_id: i64, msg: ScannerWsMessage) {
        let groups = self.groups.read();
        if let Some(tx) = groups.get(&user_id) {
            let _ = tx.send(msg);
        }
    }

    /// Send `msg` to every user in `user_ids`, isolating failures per user so
    /// one disconnected group never blocks delivery to the rest.
    pub fn send_to_users(&self, user_ids: &[i64], msg: ScannerWsMessage) {
        let groups = self.groups.read();
        for user_id in user_ids {
            if let Some(tx) = groups.get(user_id) {
                let _ = tx.send(msg.clone());
            }
        }
    }

    /// Drop a group's sender once it has no subscribers left, so idle users
    /// don't accumulate empty channels forever.
    pub fn reap_idle(&self) {
        self.groups.write().retain(|_, tx| tx.receiver_count() > 0);
    }
}
