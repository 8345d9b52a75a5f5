//! The room table: at most one owner and one guest per room, and every
//! session in at most one room.

use ahash::{HashMap, HashMapExt};

use crate::session::SessionId;

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    pub owner: SessionId,
    pub guest: Option<SessionId>,
}

/// How a departing session related to its room.
#[derive(Debug)]
pub enum Departure {
    /// The owner left; the room was removed and is handed back so the
    /// caller can tear down a remaining guest.
    OwnerLeft(Room),
    /// The guest left; the room stays open with an empty guest slot.
    GuestLeft(String),
    NotInRoom,
}

#[derive(Debug)]
pub enum RoomError {
    IdSpaceExhausted,
}

impl std::error::Error for RoomError {}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Default)]
pub struct RoomTable {
    rooms: HashMap<String, Room>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// Insert a new room owned by `owner` under a freshly generated id.
    pub fn create(&mut self, owner: SessionId) -> Result<&Room, RoomError> {
        let room_id = crate::generate_id_with(|candidate| self.rooms.contains_key(candidate))
            .ok_or(RoomError::IdSpaceExhausted)?;
        self.rooms.insert(
            room_id.clone(),
            Room {
                room_id: room_id.clone(),
                owner,
                guest: None,
            },
        );
        Ok(&self.rooms[&room_id])
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// The room the session participates in, as owner or guest.
    pub fn room_of(&self, session: SessionId) -> Option<&Room> {
        self.rooms
            .values()
            .find(|room| room.owner == session || room.guest == Some(session))
    }

    /// The room the session owns.
    pub fn owned_by(&self, session: SessionId) -> Option<&Room> {
        self.rooms.values().find(|room| room.owner == session)
    }

    pub fn is_member(&self, session: SessionId) -> bool {
        self.room_of(session).is_some()
    }

    /// Occupy the guest slot. Returns false when the room is gone or the
    /// slot is already taken.
    pub fn set_guest(&mut self, room_id: &str, guest: SessionId) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) if room.guest.is_none() => {
                room.guest = Some(guest);
                true
            }
            _ => false,
        }
    }

    pub fn clear_guest(&mut self, room_id: &str) {
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.guest = None;
        }
    }

    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        self.rooms.remove(room_id)
    }

    /// Remove `session` from whatever room it occupies. Owner departure
    /// removes the room, guest departure only clears the slot.
    pub fn depart(&mut self, session: SessionId) -> Departure {
        let owned = self
            .rooms
            .values()
            .find(|room| room.owner == session)
            .map(|room| room.room_id.clone());
        if let Some(room_id) = owned {
            if let Some(room) = self.rooms.remove(&room_id) {
                return Departure::OwnerLeft(room);
            }
        }

        let joined = self
            .rooms
            .values()
            .find(|room| room.guest == Some(session))
            .map(|room| room.room_id.clone());
        if let Some(room_id) = joined {
            self.clear_guest(&room_id);
            return Departure::GuestLeft(room_id);
        }

        Departure::NotInRoom
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: SessionId = SessionId(1);
    const GUEST: SessionId = SessionId(2);
    const OTHER: SessionId = SessionId(3);

    #[test]
    fn test_create_and_join() {
        let mut table = RoomTable::new();
        let room_id = table.create(OWNER).unwrap().room_id.clone();

        assert!(table.is_member(OWNER));
        assert!(table.owned_by(OWNER).is_some());
        assert!(table.get(&room_id).unwrap().guest.is_none());

        assert!(table.set_guest(&room_id, GUEST));
        assert!(table.is_member(GUEST));
        assert_eq!(table.room_of(GUEST).unwrap().owner, OWNER);

        // the slot holds exactly one guest
        assert!(!table.set_guest(&room_id, OTHER));
        assert!(!table.set_guest("ZZZZ0000", OTHER));
    }

    #[test]
    fn test_owner_departure_removes_the_room() {
        let mut table = RoomTable::new();
        let room_id = table.create(OWNER).unwrap().room_id.clone();
        table.set_guest(&room_id, GUEST);

        match table.depart(OWNER) {
            Departure::OwnerLeft(room) => {
                assert_eq!(room.room_id, room_id);
                assert_eq!(room.guest, Some(GUEST));
            }
            other => panic!("expected OwnerLeft, got {:?}", other),
        }
        assert!(table.is_empty());
        assert!(!table.is_member(GUEST));
    }

    #[test]
    fn test_guest_departure_keeps_the_room() {
        let mut table = RoomTable::new();
        let room_id = table.create(OWNER).unwrap().room_id.clone();
        table.set_guest(&room_id, GUEST);

        match table.depart(GUEST) {
            Departure::GuestLeft(id) => assert_eq!(id, room_id),
            other => panic!("expected GuestLeft, got {:?}", other),
        }
        assert_eq!(table.len(), 1);
        assert!(table.get(&room_id).unwrap().guest.is_none());

        // the slot is reusable afterwards
        assert!(table.set_guest(&room_id, OTHER));
    }

    #[test]
    fn test_departure_of_a_roomless_session() {
        let mut table = RoomTable::new();
        table.create(OWNER).unwrap();
        assert!(matches!(table.depart(OTHER), Departure::NotInRoom));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sessions_occupy_at_most_one_room() {
        let mut table = RoomTable::new();
        let first = table.create(OWNER).unwrap().room_id.clone();
        let second = table.create(OTHER).unwrap().room_id.clone();
        assert_ne!(first, second);

        table.set_guest(&first, GUEST);
        // the dispatcher refuses a second join while the first is live;
        // the table itself only guards the slot
        assert!(!table.set_guest(&first, GUEST));
        assert_eq!(
            table.room_of(GUEST).map(|room| room.room_id.clone()),
            Some(first)
        );
    }
}
