use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(
    /// Identifier wrapper for student accounts.
    UserId
);
id_type!(
    /// Identifier wrapper for submitted housing applications.
    ApplicationId
);
id_type!(HostelId);
id_type!(RoomId);
id_type!(AllocationId);
id_type!(PaymentId);

/// Gender recorded on a student profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

/// Gender classification of a hostel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostelGender {
    Male,
    Female,
    Mixed,
}

impl HostelGender {
    /// Whether a student of `gender` may be housed here.
    pub const fn admits(self, gender: Gender) -> bool {
        matches!(
            (self, gender),
            (HostelGender::Mixed, _)
                | (HostelGender::Male, Gender::Male)
                | (HostelGender::Female, Gender::Female)
        )
    }
}

/// Academic year of study; later years sort higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AcademicLevel {
    #[serde(rename = "YEAR_1")]
    Year1,
    #[serde(rename = "YEAR_2")]
    Year2,
    #[serde(rename = "YEAR_3")]
    Year3,
    #[serde(rename = "YEAR_4")]
    Year4,
    #[serde(rename = "YEAR_5")]
    Year5,
}

impl AcademicLevel {
    pub const fn label(self) -> &'static str {
        match self {
            AcademicLevel::Year1 => "100 Level",
            AcademicLevel::Year2 => "200 Level",
            AcademicLevel::Year3 => "300 Level",
            AcademicLevel::Year4 => "400 Level",
            AcademicLevel::Year5 => "500 Level",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Suspended,
    Inactive,
}

/// Student identity as seen by the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub matric_no: String,
    pub gender: Option<Gender>,
    pub admission_year: Option<i32>,
    pub account_status: AccountStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "PENDING",
            ApplicationStatus::Approved => "APPROVED",
            ApplicationStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

/// A student's request for accommodation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub user_id: UserId,
    pub preferences: Vec<HostelId>,
    pub gender: Gender,
    pub level: AcademicLevel,
    pub application_status: ApplicationStatus,
    pub payment_status: PaymentStatus,
    pub roommate: Option<UserId>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostel {
    pub id: HostelId,
    pub name: String,
    pub gender: HostelGender,
    pub is_active: bool,
    pub location: String,
}

/// A room with fixed capacity; occupancy is always derived from allocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hostel_id: HostelId,
    pub number: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Pending,
    Allocated,
    Confirmed,
    Rejected,
}

impl AllocationStatus {
    /// Allocated and confirmed allocations hold a bed.
    pub const fn is_active(self) -> bool {
        matches!(self, AllocationStatus::Allocated | AllocationStatus::Confirmed)
    }

    pub const fn label(self) -> &'static str {
        match self {
            AllocationStatus::Pending => "PENDING",
            AllocationStatus::Allocated => "ALLOCATED",
            AllocationStatus::Confirmed => "CONFIRMED",
            AllocationStatus::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub user_id: UserId,
    pub application_id: ApplicationId,
    pub room_id: RoomId,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub reason: String,
    pub refunded_at: DateTime<Utc>,
    pub refunded_by: Option<String>,
}

/// Money is tracked in minor units (kobo).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub application_id: ApplicationId,
    pub user_id: UserId,
    pub amount: u64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub reference: String,
    pub transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub refund: Option<RefundRecord>,
    pub created_at: DateTime<Utc>,
}

/// A room joined with its hostel and the count of beds currently held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOccupancy {
    pub room: Room,
    pub hostel: Hostel,
    pub occupancy: u32,
}

impl RoomOccupancy {
    pub fn remaining(&self) -> u32 {
        self.room.capacity.saturating_sub(self.occupancy)
    }
}
