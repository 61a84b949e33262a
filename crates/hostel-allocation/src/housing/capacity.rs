//! Per-run snapshot of remaining room capacity.
//!
//! The index is read once at the start of a run and then only mutated in
//! memory, so a single run never hands out more beds than it saw. Each
//! allocation write still carries an [`OccupancyGuard`] built from the
//! index, which lets the store reject the write if anything else filled the
//! room since the snapshot was taken.

use std::collections::HashMap;

use super::domain::{Gender, HostelId, RoomId, RoomOccupancy};
use super::repository::{HousingRepository, OccupancyGuard, RepositoryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSlot {
    pub view: RoomOccupancy,
    /// Beds already held, including ones this run has committed.
    pub occupancy: u32,
}

impl RoomSlot {
    pub fn remaining(&self) -> u32 {
        self.view.room.capacity.saturating_sub(self.occupancy)
    }

    fn guard(&self) -> OccupancyGuard {
        OccupancyGuard {
            room_id: self.view.room.id.clone(),
            expected_occupancy: self.occupancy,
        }
    }
}

/// A room picked for a candidate, not yet committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomClaim {
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    pub hostel_name: String,
    pub room_number: String,
    pub guard: OccupancyGuard,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomCapacityIndex {
    slots: Vec<RoomSlot>,
    positions: HashMap<RoomId, usize>,
}

impl RoomCapacityIndex {
    /// Build the index from room views. Rooms in inactive hostels are dropped and
    /// the rest are kept in hostel name, room number, room id order.
    pub fn from_rooms(rooms: Vec<RoomOccupancy>) -> Self {
        let mut slots: Vec<RoomSlot> = rooms
            .into_iter()
            .filter(|view| view.hostel.is_active)
            .map(|view| RoomSlot {
                occupancy: view.occupancy,
                view,
            })
            .collect();

        slots.sort_by(|left, right| {
            left.view
                .hostel
                .name
                .cmp(&right.view.hostel.name)
                .then_with(|| left.view.room.number.cmp(&right.view.room.number))
                .then_with(|| left.view.room.id.cmp(&right.view.room.id))
        });

        let positions = slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| (slot.view.room.id.clone(), idx))
            .collect();

        Self { slots, positions }
    }

    pub fn load<R>(repository: &R) -> Result<Self, RepositoryError>
    where
        R: HousingRepository + ?Sized,
    {
        Ok(Self::from_rooms(repository.rooms_in_active_hostels()?))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn remaining(&self, room: &RoomId) -> Option<u32> {
        self.slot(room).map(RoomSlot::remaining)
    }

    pub fn total_remaining(&self) -> u32 {
        self.slots.iter().map(RoomSlot::remaining).sum()
    }

    pub fn slots(&self) -> &[RoomSlot] {
        &self.slots
    }

    fn slot(&self, room: &RoomId) -> Option<&RoomSlot> {
        self.positions.get(room).and_then(|idx| self.slots.get(*idx))
    }

    /// First room with a free bed that admits `gender`. Rooms in `preferences`
    /// come first, in preference order; everything else follows index order.
    pub fn select(&self, gender: Gender, preferences: &[HostelId]) -> Option<RoomClaim> {
        let preference_rank = |hostel: &HostelId| {
            preferences
                .iter()
                .position(|preferred| preferred == hostel)
                .unwrap_or(usize::MAX)
        };

        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.view.hostel.gender.admits(gender))
            .filter(|(_, slot)| slot.remaining() > 0)
            .min_by_key(|(idx, slot)| (preference_rank(&slot.view.hostel.id), *idx))
            .map(|(_, slot)| RoomClaim {
                room_id: slot.view.room.id.clone(),
                hostel_id: slot.view.hostel.id.clone(),
                hostel_name: slot.view.hostel.name.clone(),
                room_number: slot.view.room.number.clone(),
                guard: slot.guard(),
            })
    }

    /// Record a successful write against `room`.
    pub fn commit(&mut self, room: &RoomId) {
        if let Some(slot) = self
            .positions
            .get(room)
            .and_then(|idx| self.slots.get_mut(*idx))
        {
            slot.occupancy += 1;
        }
    }

    /// Stop offering `room` for the rest of the run; its snapshot is stale.
    pub fn remove(&mut self, room: &RoomId) {
        if let Some(slot) = self
            .positions
            .get(room)
            .and_then(|idx| self.slots.get_mut(*idx))
        {
            slot.occupancy = slot.view.room.capacity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::housing::domain::{Hostel, HostelGender, Room};

    fn view(
        hostel: &str,
        name: &str,
        gender: HostelGender,
        number: &str,
        capacity: u32,
        occupancy: u32,
    ) -> RoomOccupancy {
        RoomOccupancy {
            room: Room {
                id: RoomId::new(format!("{hostel}-{number}")),
                hostel_id: HostelId::new(hostel),
                number: number.to_string(),
                capacity,
            },
            hostel: Hostel {
                id: HostelId::new(hostel),
                name: name.to_string(),
                gender,
                is_active: true,
                location: "Campus".to_string(),
            },
            occupancy,
        }
    }

    #[test]
    fn rooms_are_ordered_by_hostel_name_then_number() {
        let index = RoomCapacityIndex::from_rooms(vec![
            view("h2", "Zeta", HostelGender::Male, "101", 2, 0),
            view("h1", "Alpha", HostelGender::Male, "102", 2, 0),
            view("h1", "Alpha", HostelGender::Male, "101", 2, 0),
        ]);
        let order: Vec<&str> = index
            .slots()
            .iter()
            .map(|slot| slot.view.room.id.as_str())
            .collect();
        assert_eq!(order, vec!["h1-101", "h1-102", "h2-101"]);
    }

    #[test]
    fn inactive_hostels_are_excluded() {
        let mut closed = view("h1", "Alpha", HostelGender::Male, "101", 2, 0);
        closed.hostel.is_active = false;
        let index = RoomCapacityIndex::from_rooms(vec![closed]);
        assert!(index.is_empty());
        assert!(index.select(Gender::Male, &[]).is_none());
    }

    #[test]
    fn selection_respects_gender_and_remaining_capacity() {
        let index = RoomCapacityIndex::from_rooms(vec![
            view("h1", "Alpha", HostelGender::Female, "101", 2, 0),
            view("h2", "Beta", HostelGender::Male, "101", 2, 2),
            view("h3", "Gamma", HostelGender::Mixed, "101", 3, 1),
        ]);

        let claim = index.select(Gender::Male, &[]).expect("mixed room free");
        assert_eq!(claim.room_id, RoomId::new("h3-101"));
        assert_eq!(claim.guard.expected_occupancy, 1);

        let claim = index.select(Gender::Female, &[]).expect("female room free");
        assert_eq!(claim.room_id, RoomId::new("h1-101"));
    }

    #[test]
    fn preferred_hostels_are_tried_first() {
        let index = RoomCapacityIndex::from_rooms(vec![
            view("h1", "Alpha", HostelGender::Male, "101", 2, 0),
            view("h2", "Beta", HostelGender::Male, "101", 2, 0),
            view("h3", "Gamma", HostelGender::Male, "101", 2, 0),
        ]);
        let claim = index
            .select(Gender::Male, &[HostelId::new("h3"), HostelId::new("h2")])
            .expect("room found");
        assert_eq!(claim.hostel_id, HostelId::new("h3"));
    }

    #[test]
    fn commits_decrement_and_removal_exhausts() {
        let mut index = RoomCapacityIndex::from_rooms(vec![
            view("h1", "Alpha", HostelGender::Male, "101", 2, 1),
            view("h1", "Alpha", HostelGender::Male, "102", 2, 0),
        ]);
        let first = RoomId::new("h1-101");
        assert_eq!(index.remaining(&first), Some(1));
        assert_eq!(index.total_remaining(), 3);

        index.commit(&first);
        assert_eq!(index.remaining(&first), Some(0));
        let claim = index.select(Gender::Male, &[]).expect("second room");
        assert_eq!(claim.room_id, RoomId::new("h1-102"));

        index.remove(&claim.room_id);
        assert!(index.select(Gender::Male, &[]).is_none());
        assert_eq!(index.total_remaining(), 0);
    }
}
