//! Hostel allocation: admission windows, eligibility, room capacity, matching,
//! and the application / payment / allocation lifecycles.

pub(crate) mod capacity;
pub mod domain;
pub(crate) mod eligibility;
pub mod error;
pub mod gate;
pub mod level;
pub(crate) mod lifecycle;
pub(crate) mod matcher;
pub mod memory;
pub mod payments;
pub mod ratelimit;
pub mod report;
pub mod repository;
pub mod router;
pub mod service;
pub mod settings;

#[cfg(test)]
mod tests;

pub use capacity::{RoomCapacityIndex, RoomClaim, RoomSlot};
pub use domain::{
    AcademicLevel, AccountStatus, Allocation, AllocationId, AllocationStatus, Application,
    ApplicationId, ApplicationStatus, Gender, Hostel, HostelGender, HostelId, Payment, PaymentId,
    PaymentMethod, PaymentStatus, RefundRecord, Room, RoomId, RoomOccupancy, User, UserId,
};
pub use eligibility::{is_eligible, rank, select_candidates, Candidate, EligibilityRequest, PriorityOrder};
pub use error::HousingError;
pub use gate::{evaluate_window, WindowKind, WindowReport, WindowStatus};
pub use lifecycle::{
    check_allocation_transition, check_application_transition, check_confirmable,
    check_payment_transition, AllocationCause,
};
pub use matcher::{match_candidates, AllocationRunReport};
pub use memory::InMemoryHousingStore;
pub use payments::{
    sign_payload, verify_signature, Authorization, ChargeOutcome, DemoGateway, GatewayError,
    InitializeRequest, PaymentGateway, Verification, WebhookEvent,
};
pub use ratelimit::{CounterStore, InMemoryCounterStore, RateDecision, RateLimiter};
pub use report::{
    allocation_listing, hostel_availability, parse_gender_filter, student_status, AllocationView,
    HostelAvailability, StudentStatus, StudentSummary,
};
pub use repository::{
    ApplicationFilter, CoordinatedUpdate, HousingRepository, OccupancyGuard, RepositoryError, Swap,
};
pub use router::housing_router;
pub use service::{
    AllocationRunRequest, AllocationUpdate, ApplicationSubmission, Clock, FixedClock,
    HousingService, ManualAllocation, PaymentInitiation, PaymentRequest, PaymentUpdateReport,
    SystemClock, WebhookAck,
};
pub use settings::{normalize_date_setting, normalize_flag_setting, AllocationSettings, SettingsSnapshot};
