//! Greedy, priority-ordered matching of candidates to rooms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::capacity::RoomCapacityIndex;
use super::domain::{Allocation, AllocationId, AllocationStatus};
use super::eligibility::Candidate;
use super::repository::{HousingRepository, RepositoryError};

/// Outcome of one allocation run. A run with zero matches is still a success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRunReport {
    pub allocated_count: usize,
    pub total_considered: usize,
    pub skipped: usize,
    pub unmatched: usize,
    pub failed: usize,
    pub allocations: Vec<Allocation>,
    pub message: String,
}

impl AllocationRunReport {
    pub fn empty() -> Self {
        Self {
            message: "No pending applications to process".to_string(),
            ..Self::default()
        }
    }
}

/// What happened to a single candidate.
#[derive(Debug)]
enum CandidateOutcome {
    Allocated(Allocation),
    Skipped,
    Unmatched,
    Failed(RepositoryError),
}

/// Walk the candidates in order, committing one guarded allocation per match.
///
/// Per-candidate failures are logged and counted; they never abort the run.
pub fn match_candidates<R, F>(
    repository: &R,
    candidates: Vec<Candidate>,
    index: &mut RoomCapacityIndex,
    now: DateTime<Utc>,
    mut next_id: F,
) -> AllocationRunReport
where
    R: HousingRepository + ?Sized,
    F: FnMut() -> AllocationId,
{
    if candidates.is_empty() {
        return AllocationRunReport::empty();
    }

    let mut report = AllocationRunReport {
        total_considered: candidates.len(),
        ..AllocationRunReport::default()
    };

    info!(
        candidates = candidates.len(),
        rooms = index.len(),
        free_beds = index.total_remaining(),
        "starting allocation run"
    );

    for candidate in candidates {
        match match_one(repository, &candidate, index, now, &mut next_id) {
            CandidateOutcome::Allocated(allocation) => {
                report.allocated_count += 1;
                report.allocations.push(allocation);
            }
            CandidateOutcome::Skipped => report.skipped += 1,
            CandidateOutcome::Unmatched => report.unmatched += 1,
            CandidateOutcome::Failed(err) => {
                error!(
                    application = %candidate.application.id,
                    error = %err,
                    "allocation write failed"
                );
                report.failed += 1;
            }
        }
    }

    report.message = format!("Successfully allocated {} students", report.allocated_count);
    info!(
        allocated = report.allocated_count,
        considered = report.total_considered,
        skipped = report.skipped,
        unmatched = report.unmatched,
        failed = report.failed,
        "allocation run complete"
    );
    report
}

fn match_one<R, F>(
    repository: &R,
    candidate: &Candidate,
    index: &mut RoomCapacityIndex,
    now: DateTime<Utc>,
    next_id: &mut F,
) -> CandidateOutcome
where
    R: HousingRepository + ?Sized,
    F: FnMut() -> AllocationId,
{
    let application = &candidate.application;
    let Some(gender) = candidate.user.as_ref().and_then(|user| user.gender) else {
        warn!(application = %application.id, "skipping application with missing user or gender");
        return CandidateOutcome::Skipped;
    };

    let Some(claim) = index.select(gender, &application.preferences) else {
        info!(application = %application.id, ?gender, "no suitable room found");
        return CandidateOutcome::Unmatched;
    };

    let allocation = Allocation {
        id: next_id(),
        user_id: application.user_id.clone(),
        application_id: application.id.clone(),
        room_id: claim.room_id.clone(),
        status: AllocationStatus::Allocated,
        allocated_at: now,
        confirmed_at: None,
    };

    match repository.insert_allocation(allocation, claim.guard) {
        Ok(stored) => {
            index.commit(&claim.room_id);
            info!(
                application = %application.id,
                hostel = %claim.hostel_name,
                room = %claim.room_number,
                "allocated"
            );
            CandidateOutcome::Allocated(stored)
        }
        Err(err @ RepositoryError::CapacityConflict { .. }) => {
            index.remove(&claim.room_id);
            CandidateOutcome::Failed(err)
        }
        Err(err) => CandidateOutcome::Failed(err),
    }
}
