//! Read-side views built on derived occupancy: hostel availability, the admin
//! allocation listing, and a student's progress summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::capacity::RoomCapacityIndex;
use super::domain::{
    Allocation, AllocationId, AllocationStatus, Application, ApplicationStatus, HostelGender,
    HostelId, Payment, RoomId, User, UserId,
};
use super::error::HousingError;
use super::repository::HousingRepository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostelAvailability {
    pub id: HostelId,
    pub name: String,
    pub gender: HostelGender,
    pub location: String,
    pub total_rooms: u32,
    /// Rooms holding at least one active allocation.
    pub occupied_rooms: u32,
    /// Rooms with at least one free bed.
    pub available_rooms: u32,
    pub total_beds: u32,
    pub occupied_beds: u32,
    pub available_beds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub matric_no: String,
}

impl From<&User> for StudentSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            matric_no: user.matric_no.clone(),
        }
    }
}

/// An allocation joined with its room, hostel and student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationView {
    pub id: AllocationId,
    pub status: AllocationStatus,
    pub status_label: &'static str,
    pub allocated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub room_id: RoomId,
    pub room_number: String,
    pub room_capacity: u32,
    pub hostel_id: HostelId,
    pub hostel_name: String,
    pub hostel_location: String,
    pub student: Option<StudentSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatus {
    pub student: StudentSummary,
    pub application: Option<Application>,
    pub payment: Option<Payment>,
    pub allocation: Option<AllocationView>,
    pub progress_percentage: u8,
}

/// `ALL`, blank, or absent means no filter.
pub fn parse_gender_filter(raw: Option<&str>) -> Result<Option<HostelGender>, HousingError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    match raw.to_ascii_uppercase().as_str() {
        "ALL" => Ok(None),
        "MALE" => Ok(Some(HostelGender::Male)),
        "FEMALE" => Ok(Some(HostelGender::Female)),
        "MIXED" => Ok(Some(HostelGender::Mixed)),
        other => Err(HousingError::validation(format!(
            "unknown hostel gender filter {other}"
        ))),
    }
}

/// Active hostels by name, with bed and room counts from the capacity index.
pub fn hostel_availability<R>(
    repository: &R,
    gender: Option<HostelGender>,
) -> Result<Vec<HostelAvailability>, HousingError>
where
    R: HousingRepository + ?Sized,
{
    let mut hostels: BTreeMap<HostelId, HostelAvailability> = repository
        .hostels()?
        .into_iter()
        .filter(|hostel| hostel.is_active)
        .filter(|hostel| gender.map_or(true, |gender| hostel.gender == gender))
        .map(|hostel| {
            let entry = HostelAvailability {
                id: hostel.id.clone(),
                name: hostel.name,
                gender: hostel.gender,
                location: hostel.location,
                total_rooms: 0,
                occupied_rooms: 0,
                available_rooms: 0,
                total_beds: 0,
                occupied_beds: 0,
                available_beds: 0,
            };
            (hostel.id, entry)
        })
        .collect();

    let index = RoomCapacityIndex::load(repository)?;
    for slot in index.slots() {
        let Some(entry) = hostels.get_mut(&slot.view.hostel.id) else {
            continue;
        };
        let capacity = slot.view.room.capacity;
        let held = slot.occupancy.min(capacity);
        entry.total_rooms += 1;
        entry.total_beds += capacity;
        entry.occupied_beds += held;
        entry.available_beds += slot.remaining();
        if held > 0 {
            entry.occupied_rooms += 1;
        }
        if slot.remaining() > 0 {
            entry.available_rooms += 1;
        }
    }

    let mut listing: Vec<HostelAvailability> = hostels.into_values().collect();
    listing.sort_by(|left, right| left.name.cmp(&right.name).then_with(|| left.id.cmp(&right.id)));
    Ok(listing)
}

/// Every allocation, newest first.
pub fn allocation_listing<R>(repository: &R) -> Result<Vec<AllocationView>, HousingError>
where
    R: HousingRepository + ?Sized,
{
    let mut allocations = repository.allocations()?;
    allocations.sort_by(|left, right| {
        right
            .allocated_at
            .cmp(&left.allocated_at)
            .then_with(|| left.id.cmp(&right.id))
    });

    let mut views = Vec::with_capacity(allocations.len());
    for allocation in allocations {
        if let Some(view) = allocation_view(repository, allocation)? {
            views.push(view);
        }
    }
    Ok(views)
}

fn allocation_view<R>(
    repository: &R,
    allocation: Allocation,
) -> Result<Option<AllocationView>, HousingError>
where
    R: HousingRepository + ?Sized,
{
    let Some(room) = repository.room(&allocation.room_id)? else {
        warn!(allocation = %allocation.id, room = %allocation.room_id, "allocation points at a missing room");
        return Ok(None);
    };
    let student = repository
        .user(&allocation.user_id)?
        .as_ref()
        .map(StudentSummary::from);

    Ok(Some(AllocationView {
        id: allocation.id,
        status: allocation.status,
        status_label: allocation.status.label(),
        allocated_at: allocation.allocated_at,
        confirmed_at: allocation.confirmed_at,
        room_id: room.room.id,
        room_number: room.room.number,
        room_capacity: room.room.capacity,
        hostel_id: room.hostel.id,
        hostel_name: room.hostel.name,
        hostel_location: room.hostel.location,
        student,
    }))
}

/// Latest application, its latest payment, and the bed the student holds
/// (or the most recent allocation when none is active).
pub fn student_status<R>(repository: &R, user_id: &UserId) -> Result<StudentStatus, HousingError>
where
    R: HousingRepository + ?Sized,
{
    let user = repository
        .user(user_id)?
        .ok_or_else(|| HousingError::not_found("user", user_id))?;

    let application = repository
        .applications_for_user(user_id)?
        .into_iter()
        .max_by(|left, right| {
            left.submitted_at
                .cmp(&right.submitted_at)
                .then_with(|| left.id.cmp(&right.id))
        });

    let payment = match &application {
        Some(application) => repository
            .payments_for_application(&application.id)?
            .into_iter()
            .max_by(|left, right| {
                left.created_at
                    .cmp(&right.created_at)
                    .then_with(|| left.id.cmp(&right.id))
            }),
        None => None,
    };

    let allocation = repository
        .allocations_for_user(user_id)?
        .into_iter()
        .max_by(|left, right| {
            left.status
                .is_active()
                .cmp(&right.status.is_active())
                .then_with(|| left.allocated_at.cmp(&right.allocated_at))
                .then_with(|| left.id.cmp(&right.id))
        });
    let allocation = match allocation {
        Some(allocation) => allocation_view(repository, allocation)?,
        None => None,
    };

    let progress_percentage = match (&application, &allocation) {
        (_, Some(view)) if view.status.is_active() => 100,
        (Some(application), _) if application.application_status == ApplicationStatus::Approved => {
            75
        }
        (Some(_), _) => 50,
        (None, _) => 25,
    };

    Ok(StudentStatus {
        student: StudentSummary::from(&user),
        application,
        payment,
        allocation,
        progress_percentage,
    })
}
