//! Room registry: room id -> membership set, with admission limits and
//! empty-room reaping.
//!
//! Grounded in `tallow-relay`'s `RoomManager` (DashMap-backed, `entry()` API
//! for atomic get-or-create, room-count check performed *before* entering
//! `entry()` to avoid the DashMap shard-lock deadlock that calling `len()`
//! inside an entry would cause).

use std::collections::HashSet;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::RelayError;

pub struct RoomRecord {
    pub members: HashSet<String>,
    pub created_at: Instant,
}

impl RoomRecord {
    fn new() -> Self {
        Self {
            members: HashSet::new(),
            created_at: Instant::now(),
        }
    }
}

pub struct RoomRegistry {
    rooms: DashMap<String, RoomRecord>,
    max_rooms: usize,
    max_peers_per_room: usize,
}

impl RoomRegistry {
    pub fn new(max_rooms: usize, max_peers_per_room: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            max_rooms,
            max_peers_per_room,
        }
    }

    /// `true` if a room with this id currently has any members.
    pub fn exists(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Add `peer_id` to `room_id`, creating the room if needed.
    ///
    /// Fails with `Capacity` if the room doesn't exist yet and the server is
    /// already at `maxRooms`; fails with `RoomFull` if the room exists, is at
    /// `maxPeersPerRoom`, and `peer_id` is not already a member (a re-join by
    /// an existing member never counts against the limit).
    pub fn join(&self, room_id: &str, peer_id: &str) -> Result<(), RelayError> {
        // Checked before `entry()`: DashMap's entry API holds a shard write
        // lock, and `len()` needs to read-lock every shard, so calling it
        // inside an entry would deadlock. This is a narrow TOCTOU window —
        // worst case we admit one extra room under concurrent creation.
        if self.rooms.len() >= self.max_rooms && !self.rooms.contains_key(room_id) {
            return Err(RelayError::Capacity);
        }

        match self.rooms.entry(room_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let room = entry.get_mut();
                if !room.members.contains(peer_id) && room.members.len() >= self.max_peers_per_room
                {
                    return Err(RelayError::RoomFull);
                }
                room.members.insert(peer_id.to_string());
                Ok(())
            }
            Entry::Vacant(entry) => {
                let mut room = RoomRecord::new();
                room.members.insert(peer_id.to_string());
                entry.insert(room);
                Ok(())
            }
        }
    }

    /// Remove `peer_id` from `room_id`. Idempotent: removing an absent peer,
    /// or from an absent room, is a no-op. Deletes the room record once its
    /// membership set becomes empty so an empty room is never observable.
    pub fn leave(&self, room_id: &str, peer_id: &str) {
        let should_remove = match self.rooms.get_mut(room_id) {
            Some(mut room) => {
                room.members.remove(peer_id);
                room.members.is_empty()
            }
            None => false,
        };
        if should_remove {
            self.rooms.remove(room_id);
        }
    }

    /// Snapshot of every member in `room_id`, in no particular order.
    pub fn members(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every member in `room_id` except `except_peer_id`.
    pub fn others(&self, room_id: &str, except_peer_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.members
                    .iter()
                    .filter(|id| id.as_str() != except_peer_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of live rooms, for the `/stats`/`/health` control surface.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Total members across all rooms, for `/stats`.
    pub fn total_members(&self) -> usize {
        self.rooms.iter().map(|r| r.members.len()).sum()
    }
}
