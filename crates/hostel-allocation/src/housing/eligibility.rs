use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::domain::{Application, ApplicationId, ApplicationStatus, PaymentStatus, User, UserId};
use super::repository::{ApplicationFilter, HousingRepository, RepositoryError};
use super::settings::AllocationSettings;

/// Explicit candidate ordering for an allocation run.
///
/// Every variant finishes with an application id tie-break so the order is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    /// Senior students first, earliest submission breaks ties.
    LevelThenSubmission,
    /// Earliest submission first, senior students break ties.
    SubmissionThenLevel,
    SubmissionOnly,
    LevelOnly,
    ApplicationId,
}

impl PriorityOrder {
    pub const fn from_flags(by_level: bool, by_submission: bool) -> Self {
        match (by_level, by_submission) {
            (true, true) => PriorityOrder::LevelThenSubmission,
            (true, false) => PriorityOrder::LevelOnly,
            (false, true) => PriorityOrder::SubmissionOnly,
            (false, false) => PriorityOrder::ApplicationId,
        }
    }

    pub fn compare(self, left: &Application, right: &Application) -> Ordering {
        let by_level = || right.level.cmp(&left.level);
        let by_submission = || left.submitted_at.cmp(&right.submitted_at);

        let primary = match self {
            PriorityOrder::LevelThenSubmission => by_level().then_with(by_submission),
            PriorityOrder::SubmissionThenLevel => by_submission().then_with(by_level),
            PriorityOrder::SubmissionOnly => by_submission(),
            PriorityOrder::LevelOnly => by_level(),
            PriorityOrder::ApplicationId => Ordering::Equal,
        };

        primary.then_with(|| left.id.cmp(&right.id))
    }
}

/// An application paired with its owner, ready for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub application: Application,
    /// `None` when the owning account could not be loaded.
    pub user: Option<User>,
}

/// Parameters of one selection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibilityRequest {
    pub application_ids: Option<BTreeSet<ApplicationId>>,
    pub order: PriorityOrder,
    pub cap: usize,
}

impl EligibilityRequest {
    pub fn new(settings: &AllocationSettings, application_ids: Option<Vec<ApplicationId>>) -> Self {
        Self {
            application_ids: application_ids
                .filter(|ids| !ids.is_empty())
                .map(|ids| ids.into_iter().collect()),
            order: settings.resolved_order(),
            cap: settings.max_allocations_per_run,
        }
    }
}

/// Whether an application may be matched, given the users already holding a bed.
pub fn is_eligible(application: &Application, housed: &HashSet<UserId>) -> bool {
    application.application_status == ApplicationStatus::Approved
        && application.payment_status == PaymentStatus::Completed
        && !housed.contains(&application.user_id)
}

/// Order eligible applications and keep at most `cap` of them.
pub fn rank(
    applications: Vec<Application>,
    housed: &HashSet<UserId>,
    request: &EligibilityRequest,
) -> Vec<Application> {
    let mut eligible: Vec<Application> = applications
        .into_iter()
        .filter(|application| {
            request
                .application_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&application.id))
        })
        .filter(|application| is_eligible(application, housed))
        .collect();

    eligible.sort_by(|left, right| request.order.compare(left, right));
    eligible.truncate(request.cap);
    eligible
}

/// Read the store and produce the ordered candidate list for a run.
pub fn select_candidates<R>(
    repository: &R,
    request: &EligibilityRequest,
) -> Result<Vec<Candidate>, RepositoryError>
where
    R: HousingRepository + ?Sized,
{
    let filter = ApplicationFilter {
        ids: request.application_ids.clone(),
        application_status: Some(ApplicationStatus::Approved),
        payment_status: Some(PaymentStatus::Completed),
    };
    let applications = repository.applications(&filter)?;
    let housed: HashSet<UserId> = repository
        .active_allocations()?
        .into_iter()
        .map(|allocation| allocation.user_id)
        .collect();

    let ranked = rank(applications, &housed, request);
    let mut candidates = Vec::with_capacity(ranked.len());
    for application in ranked {
        let user = repository.user(&application.user_id)?;
        candidates.push(Candidate { application, user });
    }
    Ok(candidates)
}
