//! Mutex-backed store used by the service binary, the demo, and the tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::domain::{
    Allocation, AllocationId, Application, ApplicationId, Hostel, HostelId, Payment, PaymentId,
    Room, RoomId, RoomOccupancy, User, UserId,
};
use super::repository::{
    ApplicationFilter, CoordinatedUpdate, HousingRepository, OccupancyGuard, RepositoryError,
    Swap,
};
use super::settings::SettingsSnapshot;

#[derive(Debug, Default)]
struct StoreState {
    settings: BTreeMap<String, Value>,
    users: BTreeMap<UserId, User>,
    hostels: BTreeMap<HostelId, Hostel>,
    rooms: BTreeMap<RoomId, Room>,
    applications: BTreeMap<ApplicationId, Application>,
    allocations: BTreeMap<AllocationId, Allocation>,
    payments: BTreeMap<PaymentId, Payment>,
}

impl StoreState {
    fn occupancy(&self, room: &RoomId, excluding: Option<&AllocationId>) -> u32 {
        self.allocations
            .values()
            .filter(|allocation| &allocation.room_id == room)
            .filter(|allocation| allocation.status.is_active())
            .filter(|allocation| Some(&allocation.id) != excluding)
            .count() as u32
    }

    fn room_view(&self, room: &Room) -> Option<RoomOccupancy> {
        let hostel = self.hostels.get(&room.hostel_id)?;
        Some(RoomOccupancy {
            room: room.clone(),
            hostel: hostel.clone(),
            occupancy: self.occupancy(&room.id, None),
        })
    }

    /// Invariant checks for a write that leaves `allocation` in place.
    fn check_allocation(
        &self,
        allocation: &Allocation,
        guard: Option<&OccupancyGuard>,
    ) -> Result<(), RepositoryError> {
        let room = self
            .rooms
            .get(&allocation.room_id)
            .ok_or_else(|| RepositoryError::not_found("room", &allocation.room_id))?;

        if !allocation.status.is_active() {
            return Ok(());
        }

        let hostel = self
            .hostels
            .get(&room.hostel_id)
            .ok_or_else(|| RepositoryError::not_found("hostel", &room.hostel_id))?;
        let gender = self
            .users
            .get(&allocation.user_id)
            .and_then(|user| user.gender)
            .or_else(|| {
                self.applications
                    .get(&allocation.application_id)
                    .map(|application| application.gender)
            });
        if let Some(gender) = gender {
            if !hostel.gender.admits(gender) {
                return Err(RepositoryError::GenderMismatch {
                    hostel: hostel.id.clone(),
                    gender,
                });
            }
        }

        let held_elsewhere = self.allocations.values().any(|existing| {
            existing.id != allocation.id
                && existing.user_id == allocation.user_id
                && existing.status.is_active()
        });
        if held_elsewhere {
            return Err(RepositoryError::ActiveAllocationExists(
                allocation.user_id.clone(),
            ));
        }

        let previous = self.allocations.get(&allocation.id);
        let already_holds_bed = previous.map_or(false, |previous| {
            previous.status.is_active() && previous.room_id == allocation.room_id
        });
        if already_holds_bed && guard.is_none() {
            return Ok(());
        }

        let occupancy = self.occupancy(&room.id, Some(&allocation.id));
        let guard_holds = guard.map_or(true, |guard| {
            guard.room_id == room.id && guard.expected_occupancy == occupancy
        });
        if occupancy >= room.capacity || !guard_holds {
            return Err(RepositoryError::CapacityConflict {
                room: room.id.clone(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryHousingStore {
    state: Mutex<StoreState>,
}

impl InMemoryHousingStore {
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    pub fn put_setting(&self, key: impl Into<String>, value: Value) -> Result<(), RepositoryError> {
        self.lock()?.settings.insert(key.into(), value);
        Ok(())
    }

    pub fn put_user(&self, user: User) -> Result<(), RepositoryError> {
        self.lock()?.users.insert(user.id.clone(), user);
        Ok(())
    }

    pub fn put_hostel(&self, hostel: Hostel) -> Result<(), RepositoryError> {
        self.lock()?.hostels.insert(hostel.id.clone(), hostel);
        Ok(())
    }

    pub fn put_room(&self, room: Room) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if !state.hostels.contains_key(&room.hostel_id) {
            return Err(RepositoryError::not_found("hostel", &room.hostel_id));
        }
        state.rooms.insert(room.id.clone(), room);
        Ok(())
    }
}

impl HousingRepository for InMemoryHousingStore {
    fn settings(&self) -> Result<SettingsSnapshot, RepositoryError> {
        Ok(SettingsSnapshot::new(self.lock()?.settings.clone()))
    }

    fn user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.lock()?.users.get(id).cloned())
    }

    fn hostel(&self, id: &HostelId) -> Result<Option<Hostel>, RepositoryError> {
        Ok(self.lock()?.hostels.get(id).cloned())
    }

    fn hostels(&self) -> Result<Vec<Hostel>, RepositoryError> {
        Ok(self.lock()?.hostels.values().cloned().collect())
    }

    fn room(&self, id: &RoomId) -> Result<Option<RoomOccupancy>, RepositoryError> {
        let state = self.lock()?;
        Ok(state.rooms.get(id).and_then(|room| state.room_view(room)))
    }

    fn rooms_in_active_hostels(&self) -> Result<Vec<RoomOccupancy>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .rooms
            .values()
            .filter_map(|room| state.room_view(room))
            .filter(|view| view.hostel.is_active)
            .collect())
    }

    fn application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock()?.applications.get(id).cloned())
    }

    fn applications(
        &self,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, RepositoryError> {
        Ok(self
            .lock()?
            .applications
            .values()
            .filter(|application| filter.matches(application))
            .cloned()
            .collect())
    }

    fn applications_for_user(&self, user: &UserId) -> Result<Vec<Application>, RepositoryError> {
        Ok(self
            .lock()?
            .applications
            .values()
            .filter(|application| &application.user_id == user)
            .cloned()
            .collect())
    }

    fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        let mut state = self.lock()?;
        if state.applications.contains_key(&application.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(application)
    }

    fn update_application(&self, application: Application) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        match state.applications.get_mut(&application.id) {
            Some(existing) => {
                *existing = application;
                Ok(())
            }
            None => Err(RepositoryError::not_found("application", &application.id)),
        }
    }

    fn allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, RepositoryError> {
        Ok(self.lock()?.allocations.get(id).cloned())
    }

    fn active_allocations(&self) -> Result<Vec<Allocation>, RepositoryError> {
        Ok(self
            .lock()?
            .allocations
            .values()
            .filter(|allocation| allocation.status.is_active())
            .cloned()
            .collect())
    }

    fn allocations(&self) -> Result<Vec<Allocation>, RepositoryError> {
        Ok(self.lock()?.allocations.values().cloned().collect())
    }

    fn allocations_for_user(&self, user: &UserId) -> Result<Vec<Allocation>, RepositoryError> {
        Ok(self
            .lock()?
            .allocations
            .values()
            .filter(|allocation| &allocation.user_id == user)
            .cloned()
            .collect())
    }

    fn allocations_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<Allocation>, RepositoryError> {
        Ok(self
            .lock()?
            .allocations
            .values()
            .filter(|allocation| &allocation.application_id == id)
            .cloned()
            .collect())
    }

    fn insert_allocation(
        &self,
        allocation: Allocation,
        guard: OccupancyGuard,
    ) -> Result<Allocation, RepositoryError> {
        let mut state = self.lock()?;
        if state.allocations.contains_key(&allocation.id) {
            return Err(RepositoryError::Conflict);
        }
        state.check_allocation(&allocation, Some(&guard))?;
        state
            .allocations
            .insert(allocation.id.clone(), allocation.clone());
        Ok(allocation)
    }

    fn update_allocation(
        &self,
        swap: Swap<Allocation>,
        guard: Option<OccupancyGuard>,
    ) -> Result<Allocation, RepositoryError> {
        let mut state = self.lock()?;
        check_swap(
            state.allocations.get(&swap.next.id),
            &swap,
            "allocation",
            &swap.next.id,
        )?;
        let allocation = swap.next;
        state.check_allocation(&allocation, guard.as_ref())?;
        state
            .allocations
            .insert(allocation.id.clone(), allocation.clone());
        Ok(allocation)
    }

    fn delete_allocation(&self, id: &AllocationId) -> Result<Allocation, RepositoryError> {
        self.lock()?
            .allocations
            .remove(id)
            .ok_or_else(|| RepositoryError::not_found("allocation", id))
    }

    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        Ok(self.lock()?.payments.get(id).cloned())
    }

    fn payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, RepositoryError> {
        Ok(self
            .lock()?
            .payments
            .values()
            .find(|payment| payment.reference == reference)
            .cloned())
    }

    fn payments_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<Payment>, RepositoryError> {
        Ok(self
            .lock()?
            .payments
            .values()
            .filter(|payment| &payment.application_id == id)
            .cloned()
            .collect())
    }

    fn insert_payment(&self, payment: Payment) -> Result<Payment, RepositoryError> {
        let mut state = self.lock()?;
        let duplicate = state.payments.contains_key(&payment.id)
            || state
                .payments
                .values()
                .any(|existing| existing.reference == payment.reference);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        state.payments.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    fn apply(&self, update: CoordinatedUpdate) -> Result<(), RepositoryError> {
        if update.is_empty() {
            return Ok(());
        }
        let mut state = self.lock()?;

        if let Some(swap) = &update.payment {
            check_swap(state.payments.get(&swap.next.id), swap, "payment", &swap.next.id)?;
        }
        if let Some(swap) = &update.application {
            check_swap(
                state.applications.get(&swap.next.id),
                swap,
                "application",
                &swap.next.id,
            )?;
        }
        for swap in &update.allocations {
            check_swap(
                state.allocations.get(&swap.next.id),
                swap,
                "allocation",
                &swap.next.id,
            )?;
            state.check_allocation(&swap.next, None)?;
        }

        if let Some(swap) = update.payment {
            state.payments.insert(swap.next.id.clone(), swap.next);
        }
        if let Some(swap) = update.application {
            state.applications.insert(swap.next.id.clone(), swap.next);
        }
        for swap in update.allocations {
            state.allocations.insert(swap.next.id.clone(), swap.next);
        }

        Ok(())
    }
}

fn check_swap<T: PartialEq>(
    stored: Option<&T>,
    swap: &Swap<T>,
    entity: &'static str,
    id: &impl ToString,
) -> Result<(), RepositoryError> {
    match stored {
        None => Err(RepositoryError::not_found(entity, id.to_string())),
        Some(stored) if *stored != swap.expected => {
            Err(RepositoryError::stale(entity, id.to_string()))
        }
        Some(_) => Ok(()),
    }
}
