//! Rooms and room connections.
//!
//! A [`Room`] owns the authoritative [`SharedDoc`] for one named partition
//! of the synchronization space, plus the membership of currently connected
//! clients. Updates are fanned out over one broadcast channel per room,
//! registered when the room is created: cross-room delivery is impossible by
//! construction and listeners never accumulate per connection.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use mawa_collab::{SharedDoc, UpdateOrigin};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Identifies one connection within its room, used to keep a sender's own
/// updates out of its broadcast stream.
pub type ConnectionId = u64;

/// Capacity of the per-room broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// A room: one shared document plus its member connections.
pub struct Room {
    name: String,
    /// The authoritative document. The lock is held across the whole
    /// decode-apply-broadcast step, with no await point inside, so no other
    /// message for this document interleaves mid-apply.
    doc: Mutex<SharedDoc>,
    /// Broadcast channel for update fan-out, tagged with the sender's id
    broadcast_tx: broadcast::Sender<(ConnectionId, Vec<u8>)>,
    /// Currently connected members
    members: Mutex<HashSet<ConnectionId>>,
    next_connection_id: AtomicU64,
}

impl Room {
    /// Create an empty room.
    pub fn new(name: &str) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        Self {
            name: name.to_string(),
            doc: Mutex::new(SharedDoc::new()),
            broadcast_tx,
            members: Mutex::new(HashSet::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// The room's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove a connection from the membership set.
    ///
    /// Idempotent: removing an already removed connection is a no-op. The
    /// room and its document persist with zero members.
    pub fn leave(&self, id: ConnectionId) {
        let removed = self.members.lock().unwrap().remove(&id);
        if removed {
            debug!(room = %self.name, connection = id, "connection left");
        }
    }

    /// Number of current member connections.
    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    /// Apply an inbound update and fan it out to the other members.
    ///
    /// Decode, apply, and broadcast run as one atomic step under the
    /// document lock. A payload that does not decode as an update is logged
    /// with room context and dropped: the document stays untouched, nothing
    /// is broadcast, and the connection stays open. Returns whether the
    /// update was applied.
    pub fn handle_update(&self, sender: ConnectionId, bytes: &[u8]) -> bool {
        let doc = self.doc.lock().unwrap();
        match doc.apply_update(bytes, UpdateOrigin::Remote) {
            Ok(()) => {
                // Forward the original bytes unmodified; receivers filter
                // out their own id.
                let _ = self.broadcast_tx.send((sender, bytes.to_vec()));
                true
            }
            Err(e) => {
                warn!(
                    room = %self.name,
                    connection = sender,
                    "dropping malformed update ({} bytes): {}",
                    bytes.len(),
                    e
                );
                false
            }
        }
    }

    /// Encode the document's full state, sent to every new connection
    /// before any incremental update.
    pub fn snapshot(&self) -> Vec<u8> {
        self.doc.lock().unwrap().encode_snapshot()
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("members", &self.member_count())
            .finish()
    }
}

/// One connection's membership in a room.
pub struct RoomConnection {
    id: ConnectionId,
    room: Arc<Room>,
    broadcast_rx: broadcast::Receiver<(ConnectionId, Vec<u8>)>,
}

impl RoomConnection {
    /// Join a room: register membership and subscribe to update fan-out.
    ///
    /// The connection leaves the room when dropped.
    pub fn new(room: Arc<Room>) -> Self {
        let id = room.next_connection_id.fetch_add(1, Ordering::SeqCst);
        room.members.lock().unwrap().insert(id);
        let broadcast_rx = room.broadcast_tx.subscribe();

        debug!(room = %room.name, connection = id, "connection joined");

        Self {
            id,
            room,
            broadcast_rx,
        }
    }

    /// This connection's id within the room.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Receive the next broadcast update from another member.
    ///
    /// Updates this connection sent itself are skipped. A receiver that
    /// lagged behind the channel is resynchronized with a fresh full
    /// snapshot instead of being dropped. Returns `None` once the room's
    /// channel is closed.
    pub async fn recv_broadcast(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.broadcast_rx.recv().await {
                Ok((sender, bytes)) => {
                    if sender != self.id {
                        return Some(bytes);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        room = %self.room.name,
                        connection = self.id,
                        "connection lagged {} updates, resyncing with full snapshot",
                        n
                    );
                    return Some(self.room.snapshot());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.room.leave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use yrs::{Map, Transact};

    fn make_update(key: &str, value: &str) -> Vec<u8> {
        let doc = SharedDoc::new();
        let map = doc.map("beds");
        {
            let mut txn = doc.doc().transact_mut();
            map.insert(&mut txn, key, value);
        }
        doc.encode_snapshot()
    }

    fn read_field(doc: &SharedDoc, key: &str) -> Option<String> {
        let map = doc.map("beds");
        let txn = doc.doc().transact();
        map.get(&txn, key).and_then(|v| v.cast::<String>().ok())
    }

    async fn recv_with_timeout(conn: &mut RoomConnection) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_millis(200), conn.recv_broadcast())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_update_forwarded_to_peers_not_sender() {
        let room = Arc::new(Room::new("hall-42"));
        let mut conn1 = RoomConnection::new(Arc::clone(&room));
        let mut conn2 = RoomConnection::new(Arc::clone(&room));

        let update = make_update("F", "1");
        assert!(room.handle_update(conn1.id(), &update));

        // Peer receives the original bytes unmodified
        let received = recv_with_timeout(&mut conn2).await.expect("peer update");
        assert_eq!(received, update);

        // Sender does not get its own update back
        assert!(recv_with_timeout(&mut conn1).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_update_dropped() {
        let room = Arc::new(Room::new("hall-42"));
        let conn1 = RoomConnection::new(Arc::clone(&room));
        let mut conn2 = RoomConnection::new(Arc::clone(&room));

        let before = room.snapshot();
        assert!(!room.handle_update(conn1.id(), &[0xFF, 0x00, 0x13, 0x37]));

        // Document untouched, nothing broadcast
        assert_eq!(room.snapshot(), before);
        assert!(recv_with_timeout(&mut conn2).await.is_none());

        // The sender's connection is still usable afterwards
        let update = make_update("F", "1");
        assert!(room.handle_update(conn1.id(), &update));
        assert_eq!(recv_with_timeout(&mut conn2).await.unwrap(), update);
    }

    #[tokio::test]
    async fn test_snapshot_carries_prior_updates() {
        let room = Arc::new(Room::new("hall-42"));
        let conn = RoomConnection::new(Arc::clone(&room));
        room.handle_update(conn.id(), &make_update("F", "1"));

        let replica = SharedDoc::new();
        replica
            .apply_update(&room.snapshot(), UpdateOrigin::Sync)
            .unwrap();
        assert_eq!(read_field(&replica, "F").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_leave_is_idempotent_and_room_persists() {
        let room = Arc::new(Room::new("hall-42"));
        let conn = RoomConnection::new(Arc::clone(&room));
        room.handle_update(conn.id(), &make_update("F", "1"));
        assert_eq!(room.member_count(), 1);

        let id = conn.id();
        drop(conn);
        assert_eq!(room.member_count(), 0);

        // Explicit second leave is a no-op
        room.leave(id);
        assert_eq!(room.member_count(), 0);

        // State survives an empty membership set
        let replica = SharedDoc::new();
        replica
            .apply_update(&room.snapshot(), UpdateOrigin::Sync)
            .unwrap();
        assert_eq!(read_field(&replica, "F").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_updates_from_one_connection_arrive_in_order() {
        let room = Arc::new(Room::new("hall-42"));
        let conn1 = RoomConnection::new(Arc::clone(&room));
        let mut conn2 = RoomConnection::new(Arc::clone(&room));

        let u1 = make_update("F", "1");
        let u2 = make_update("G", "2");
        room.handle_update(conn1.id(), &u1);
        room.handle_update(conn1.id(), &u2);

        assert_eq!(recv_with_timeout(&mut conn2).await.unwrap(), u1);
        assert_eq!(recv_with_timeout(&mut conn2).await.unwrap(), u2);
    }
}
