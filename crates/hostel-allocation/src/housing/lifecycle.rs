//! Legal state transitions for applications, payments, and allocations.
//!
//! These checks are pure; the service loads entities, asks here whether a move
//! is allowed, and then writes. Cross-entity rules that need more than two
//! statuses (confirmation requires a completed payment) are checked here too.

use super::domain::{AllocationStatus, ApplicationStatus, PaymentStatus};
use super::error::HousingError;

/// Who is asking for an allocation move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationCause {
    /// An admin edit through the allocation surface.
    Admin,
    /// The refund coordination releasing a bed.
    Refund,
}

fn invalid(entity: &'static str, from: &'static str, to: &'static str) -> HousingError {
    HousingError::InvalidTransition { entity, from, to }
}

pub fn check_application_transition(
    from: ApplicationStatus,
    to: ApplicationStatus,
) -> Result<(), HousingError> {
    use ApplicationStatus::*;

    match (from, to) {
        (Pending, Approved) | (Pending, Rejected) | (Approved, Rejected) => Ok(()),
        _ => Err(invalid("application", from.label(), to.label())),
    }
}

pub fn check_payment_transition(
    from: PaymentStatus,
    to: PaymentStatus,
) -> Result<(), HousingError> {
    use PaymentStatus::*;

    match (from, to) {
        (Pending, Completed) | (Pending, Failed) | (Completed, Refunded) => Ok(()),
        _ => Err(invalid("payment", from.label(), to.label())),
    }
}

pub fn check_allocation_transition(
    from: AllocationStatus,
    to: AllocationStatus,
    cause: AllocationCause,
) -> Result<(), HousingError> {
    use AllocationStatus::*;

    let allowed = match cause {
        AllocationCause::Admin => matches!(
            (from, to),
            (Pending, Allocated)
                | (Allocated, Confirmed)
                | (Allocated, Rejected)
                | (Pending, Rejected)
        ),
        AllocationCause::Refund => matches!((from, to), (Allocated, Pending) | (Confirmed, Pending)),
    };

    if allowed {
        Ok(())
    } else {
        Err(invalid("allocation", from.label(), to.label()))
    }
}

/// An allocation may only be confirmed once the application's payment completed.
pub fn check_confirmable(payment_status: PaymentStatus) -> Result<(), HousingError> {
    if payment_status == PaymentStatus::Completed {
        Ok(())
    } else {
        Err(HousingError::validation(format!(
            "allocation cannot be confirmed while payment is {}",
            payment_status.label()
        )))
    }
}
