//! Room registry: membership bookkeeping and overflow sharding.
//!
//! Rooms are created on first join and deleted the instant their last
//! occupant leaves. A room that fills up past `max_occupants` spills late
//! joiners into numbered shards (`base--2`, `base--3`, ...); a base room and
//! its shards are distinct registry entries, related only by name prefix.
//! Sharding bounds per-room broadcast fan-out instead of rejecting joiners.
//!
//! The registry is plain mutable state; callers serialize access behind a
//! lock (see `server::state::AppState`).

use std::collections::HashMap;

/// Threshold for sharding a room.
pub const DEFAULT_MAX_OCCUPANTS: usize = 50;

/// Separator between a base room name and its shard number.
const SHARD_SEPARATOR: &str = "--";

/// A named set of connections that may broadcast to each other.
#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    /// Live membership: identity -> join timestamp (epoch milliseconds).
    pub occupants: HashMap<String, i64>,
    /// Cached cardinality; always equal to `occupants.len()`.
    pub occupant_count: usize,
    /// Creation-order sequence, used to scan shards oldest-first.
    created_seq: u64,
}

impl Room {
    fn new(name: String, created_seq: u64) -> Self {
        Self {
            name,
            occupants: HashMap::new(),
            occupant_count: 0,
            created_seq,
        }
    }
}

/// Owns the mapping from room name to room state.
#[derive(Debug)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    max_occupants: usize,
    next_seq: u64,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_OCCUPANTS)
    }

    /// Registry with a custom per-room occupant limit.
    pub fn with_capacity(max_occupants: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            max_occupants,
            next_seq: 0,
        }
    }

    /// Join `room_name`, or the first shard with spare capacity, or a newly
    /// created shard if every instance is full. Records `identity -> now`
    /// in the chosen room and returns its (possibly shard-renamed) name
    /// together with the recorded join timestamp.
    pub fn join_or_create(&mut self, room_name: &str, identity: &str, now: i64) -> (String, i64) {
        let mut target = room_name.to_string();
        if !self.rooms.contains_key(&target) {
            let room = Room::new(target.clone(), self.next_seq);
            self.next_seq += 1;
            self.rooms.insert(target.clone(), room);
        }

        if self.rooms[&target].occupant_count >= self.max_occupants {
            // Room is full, search for a spot in other instances. The base
            // room counts as instance 1; shards are scanned oldest-first.
            let prefix = format!("{room_name}{SHARD_SEPARATOR}");
            let mut shards: Vec<(&String, &Room)> = self
                .rooms
                .iter()
                .filter(|(name, _)| name.starts_with(&prefix))
                .collect();
            shards.sort_by_key(|(_, room)| room.created_seq);

            let mut instances = 1;
            let mut available = None;
            for (name, room) in shards {
                instances += 1;
                if room.occupant_count < self.max_occupants {
                    available = Some(name.clone());
                    break;
                }
            }

            target = match available {
                Some(name) => name,
                None => {
                    // No instance has a free slot; create the next-numbered
                    // shard. The suffix is derived from the count of shards
                    // observed during the scan, so numbering is best-effort
                    // under churn; bump past any surviving entry rather than
                    // clobbering its occupants.
                    let mut number = instances + 1;
                    let mut name = format!("{prefix}{number}");
                    while self.rooms.contains_key(&name) {
                        number += 1;
                        name = format!("{prefix}{number}");
                    }
                    let shard = Room::new(name.clone(), self.next_seq);
                    self.next_seq += 1;
                    self.rooms.insert(name.clone(), shard);
                    name
                }
            };
        }

        let room = self
            .rooms
            .get_mut(&target)
            .expect("target room exists after capacity resolution");
        room.occupants.insert(identity.to_string(), now);
        room.occupant_count = room.occupants.len();
        (target, now)
    }

    /// Remove `identity` from `room_name`; deletes the room when the last
    /// occupant leaves. Unknown room or identity is a no-op.
    pub fn leave(&mut self, room_name: &str, identity: &str) {
        if let Some(room) = self.rooms.get_mut(room_name) {
            if room.occupants.remove(identity).is_some() {
                room.occupant_count = room.occupants.len();
            }
            if room.occupant_count == 0 {
                self.rooms.remove(room_name);
            }
        }
    }

    /// Read-only view of a room's occupant map, used to build
    /// `occupantsChanged` payloads.
    pub fn snapshot(&self, room_name: &str) -> Option<HashMap<String, i64>> {
        self.rooms.get(room_name).map(|room| room.occupants.clone())
    }

    pub fn get(&self, room_name: &str) -> Option<&Room> {
        self.rooms.get(room_name)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
