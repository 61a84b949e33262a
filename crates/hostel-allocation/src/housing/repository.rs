use std::collections::BTreeSet;

use super::domain::{
    Allocation, AllocationId, Application, ApplicationId, ApplicationStatus, Gender, Hostel, HostelId,
    Payment, PaymentId, PaymentStatus, RoomId, RoomOccupancy, User, UserId,
};
use super::settings::SettingsSnapshot;

/// Filtered read over applications; `None` fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    pub ids: Option<BTreeSet<ApplicationId>>,
    pub application_status: Option<ApplicationStatus>,
    pub payment_status: Option<PaymentStatus>,
}

impl ApplicationFilter {
    pub fn matches(&self, application: &Application) -> bool {
        self.ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&application.id))
            && self
                .application_status
                .map_or(true, |status| status == application.application_status)
            && self
                .payment_status
                .map_or(true, |status| status == application.payment_status)
    }
}

/// Condition attached to an allocation write: the room must still hold exactly
/// `expected_occupancy` active allocations (and have a free bed) when the write lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupancyGuard {
    pub room_id: RoomId,
    pub expected_occupancy: u32,
}

/// Compare-and-swap of one record: the write only lands if the stored record
/// still equals `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Swap<T> {
    pub expected: T,
    pub next: T,
}

impl<T> Swap<T> {
    pub fn new(expected: T, next: T) -> Self {
        Self { expected, next }
    }
}

/// Several entity writes that must land together or not at all. Each write
/// carries the record it was derived from, so an interleaved change to any of
/// them aborts the whole update with [`RepositoryError::Stale`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatedUpdate {
    pub payment: Option<Swap<Payment>>,
    pub application: Option<Swap<Application>>,
    pub allocations: Vec<Swap<Allocation>>,
}

impl CoordinatedUpdate {
    pub fn is_empty(&self) -> bool {
        self.payment.is_none() && self.application.is_none() && self.allocations.is_empty()
    }
}

/// Storage abstraction so the allocation engine can be exercised in isolation.
///
/// Implementations must make `insert_allocation`, `update_allocation` and
/// `apply` atomic with respect to each other: the occupancy check and the
/// write happen under one lock or one transaction.
pub trait HousingRepository: Send + Sync {
    fn settings(&self) -> Result<SettingsSnapshot, RepositoryError>;

    fn user(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    fn hostel(&self, id: &HostelId) -> Result<Option<Hostel>, RepositoryError>;

    fn hostels(&self) -> Result<Vec<Hostel>, RepositoryError>;

    /// A single room with its hostel and derived occupancy, whatever the hostel's state.
    fn room(&self, id: &RoomId) -> Result<Option<RoomOccupancy>, RepositoryError>;

    /// Every room of every active hostel with derived occupancy.
    fn rooms_in_active_hostels(&self) -> Result<Vec<RoomOccupancy>, RepositoryError>;

    fn application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;

    fn applications(&self, filter: &ApplicationFilter)
        -> Result<Vec<Application>, RepositoryError>;

    fn applications_for_user(&self, user: &UserId) -> Result<Vec<Application>, RepositoryError>;

    fn insert_application(&self, application: Application)
        -> Result<Application, RepositoryError>;

    fn update_application(&self, application: Application) -> Result<(), RepositoryError>;

    fn allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, RepositoryError>;

    fn active_allocations(&self) -> Result<Vec<Allocation>, RepositoryError>;

    /// Every allocation in any status.
    fn allocations(&self) -> Result<Vec<Allocation>, RepositoryError>;

    fn allocations_for_user(&self, user: &UserId) -> Result<Vec<Allocation>, RepositoryError>;

    fn allocations_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<Allocation>, RepositoryError>;

    /// Conditional create: fails with [`RepositoryError::CapacityConflict`] when the
    /// guard no longer holds and [`RepositoryError::ActiveAllocationExists`] when the
    /// user already holds a bed.
    fn insert_allocation(
        &self,
        allocation: Allocation,
        guard: OccupancyGuard,
    ) -> Result<Allocation, RepositoryError>;

    /// Replace an allocation that still equals `swap.expected`. Writes that take
    /// a bed are re-checked against capacity.
    fn update_allocation(
        &self,
        swap: Swap<Allocation>,
        guard: Option<OccupancyGuard>,
    ) -> Result<Allocation, RepositoryError>;

    fn delete_allocation(&self, id: &AllocationId) -> Result<Allocation, RepositoryError>;

    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError>;

    fn payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, RepositoryError>;

    fn payments_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<Payment>, RepositoryError>;

    fn insert_payment(&self, payment: Payment) -> Result<Payment, RepositoryError>;

    /// Apply every write in `update` atomically. Every entity must already exist
    /// and still match its `expected` record.
    fn apply(&self, update: CoordinatedUpdate) -> Result<(), RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("room {room} has no free bed at the expected occupancy")]
    CapacityConflict { room: RoomId },
    #[error("user {0} already holds an active allocation")]
    ActiveAllocationExists(UserId),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} {id} changed since it was read")]
    Stale { entity: &'static str, id: String },
    #[error("hostel {hostel} does not admit {gender:?} students")]
    GenderMismatch { hostel: HostelId, gender: Gender },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn stale(entity: &'static str, id: impl ToString) -> Self {
        Self::Stale {
            entity,
            id: id.to_string(),
        }
    }
}
