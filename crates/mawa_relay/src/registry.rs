//! Document registry.
//!
//! Process-wide lookup table mapping room name to room, lazily creating a
//! room's document on first reference. The registry is constructed at server
//! start and passed into connection handlers through the router state; it is
//! never a module-level singleton.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::room::Room;

/// Statistics about the registry
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub active_connections: usize,
    pub active_rooms: usize,
}

/// Registry of all rooms in this process.
pub struct Registry {
    /// Map of room name to room
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    /// Whether to remove rooms once their last connection leaves.
    /// Off by default: the baseline design never evicts.
    evict_idle_rooms: bool,
}

impl Registry {
    /// Create a new registry.
    pub fn new(evict_idle_rooms: bool) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            evict_idle_rooms,
        }
    }

    /// Get or create the room with the given name.
    pub async fn get_or_create(&self, name: &str) -> Arc<Room> {
        // Check if the room exists
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(name) {
                return Arc::clone(room);
            }
        }

        let mut rooms = self.rooms.write().await;

        // Double-check after acquiring the write lock
        if let Some(room) = rooms.get(name) {
            return Arc::clone(room);
        }

        let room = Arc::new(Room::new(name));
        rooms.insert(name.to_string(), Arc::clone(&room));
        info!(room = name, "created room");

        room
    }

    /// Get an existing room by name (does not create).
    pub async fn get(&self, name: &str) -> Option<Arc<Room>> {
        let rooms = self.rooms.read().await;
        rooms.get(name).cloned()
    }

    /// Remove a room if eviction is enabled and it has no members left.
    pub async fn maybe_remove_room(&self, name: &str) {
        if !self.evict_idle_rooms {
            return;
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(name) {
            if room.member_count() == 0 {
                rooms.remove(name);
                info!(room = name, "removed idle room");
            }
        }
    }

    /// Get statistics about the registry.
    pub async fn stats(&self) -> RegistryStats {
        let rooms = self.rooms.read().await;
        let active_connections = rooms.values().map(|r| r.member_count()).sum();

        RegistryStats {
            active_connections,
            active_rooms: rooms.len(),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("evict_idle_rooms", &self.evict_idle_rooms)
            .finish()
    }
}
