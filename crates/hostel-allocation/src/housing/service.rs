use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::capacity::RoomCapacityIndex;
use super::domain::{
    AccountStatus, Allocation, AllocationId, AllocationStatus, Application, ApplicationId,
    ApplicationStatus, HostelGender, HostelId, Payment, PaymentId, PaymentMethod, PaymentStatus,
    RefundRecord, RoomId, RoomOccupancy, User, UserId,
};
use super::eligibility::{select_candidates, EligibilityRequest};
use super::error::HousingError;
use super::gate::{application_window, payment_window, window_from_store, WindowKind, WindowReport};
use super::level::{academic_level, admission_year_from_matric};
use super::lifecycle::{
    check_allocation_transition, check_application_transition, check_confirmable,
    check_payment_transition, AllocationCause,
};
use super::matcher::{match_candidates, AllocationRunReport};
use super::payments::{
    verify_signature, Authorization, ChargeEvent, ChargeOutcome, InitializeRequest,
    PaymentGateway, WebhookEvent,
};
use super::report::{
    allocation_listing, hostel_availability, student_status, AllocationView, HostelAvailability,
    StudentStatus,
};
use super::repository::{CoordinatedUpdate, HousingRepository, OccupancyGuard, Swap};
use super::settings::{AllocationSettings, AllocationSettingsPatch};

/// Source of the current instant, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRunRequest {
    #[serde(default)]
    pub settings: AllocationSettingsPatch,
    #[serde(default)]
    pub application_ids: Option<Vec<ApplicationId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAllocation {
    pub user_id: UserId,
    pub room_id: RoomId,
    #[serde(default)]
    pub application_id: Option<ApplicationId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationUpdate {
    #[serde(default)]
    pub status: Option<AllocationStatus>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSubmission {
    pub user_id: UserId,
    pub preferences: Vec<HostelId>,
    #[serde(default)]
    pub roommate: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub application_id: ApplicationId,
    pub amount: u64,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub payment: Payment,
    pub authorization: Option<Authorization>,
}

/// Result of an admin payment action and the allocation it touched, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentUpdateReport {
    pub payment: Payment,
    pub allocations: Vec<Allocation>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    pub event: String,
    pub applied: bool,
}

/// Facade over the allocation engine: every admin and student operation goes
/// through here so lifecycle checks and coordinated writes live in one place.
pub struct HousingService<R, G> {
    repository: Arc<R>,
    gateway: Arc<G>,
    clock: Arc<dyn Clock>,
    webhook_secret: String,
    sequence: AtomicU64,
}

impl<R, G> HousingService<R, G>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(repository: Arc<R>, gateway: Arc<G>, webhook_secret: impl Into<String>) -> Self {
        Self {
            repository,
            gateway,
            clock: Arc::new(SystemClock),
            webhook_secret: webhook_secret.into(),
            sequence: AtomicU64::new(1),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn next_id(&self, prefix: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{}-{sequence}", self.now().timestamp_millis())
    }

    pub fn application_window(&self) -> WindowReport {
        window_from_store(WindowKind::Application, self.repository.settings(), self.now())
    }

    pub fn payment_window(&self) -> WindowReport {
        window_from_store(WindowKind::Payment, self.repository.settings(), self.now())
    }

    pub fn hostel_availability(
        &self,
        gender: Option<HostelGender>,
    ) -> Result<Vec<HostelAvailability>, HousingError> {
        hostel_availability(self.repository.as_ref(), gender)
    }

    pub fn list_allocations(&self) -> Result<Vec<AllocationView>, HousingError> {
        allocation_listing(self.repository.as_ref())
    }

    pub fn student_status(&self, user: &UserId) -> Result<StudentStatus, HousingError> {
        student_status(self.repository.as_ref(), user)
    }

    /// Run the matcher over the current eligible pool.
    ///
    /// Store failures while selecting candidates or reading rooms abort the run
    /// before any write. Failures on individual candidates only show up in the report.
    pub fn run_allocation(
        &self,
        request: AllocationRunRequest,
    ) -> Result<AllocationRunReport, HousingError> {
        let settings =
            AllocationSettings::from_snapshot(&self.repository.settings()?).merged(&request.settings);
        let eligibility = EligibilityRequest::new(&settings, request.application_ids);
        info!(
            order = ?eligibility.order,
            cap = eligibility.cap,
            restricted = eligibility.application_ids.is_some(),
            "allocation run requested"
        );

        let candidates = select_candidates(self.repository.as_ref(), &eligibility)?;
        if candidates.is_empty() {
            return Ok(AllocationRunReport::empty());
        }

        let mut index = RoomCapacityIndex::load(self.repository.as_ref())?;
        let free_beds = index.total_remaining();
        let now = self.now();

        let mut report = match_candidates(self.repository.as_ref(), candidates, &mut index, now, || {
            AllocationId::new(self.next_id("alloc"))
        });
        if free_beds == 0 {
            report.message = "No available rooms for allocation".to_string();
        }
        Ok(report)
    }

    /// Place one student in a specific room, bypassing the ordering.
    pub fn create_allocation(&self, request: ManualAllocation) -> Result<Allocation, HousingError> {
        let user = self.load_user(&request.user_id)?;
        let application = match &request.application_id {
            Some(id) => {
                let application = self.load_application(id)?;
                if application.user_id != user.id {
                    return Err(HousingError::validation(format!(
                        "application {id} does not belong to user {}",
                        user.id
                    )));
                }
                application
            }
            None => self.open_application_for(&user.id)?,
        };
        if application.application_status == ApplicationStatus::Rejected {
            return Err(HousingError::validation(
                "rejected applications cannot be allocated",
            ));
        }

        let room = self.load_room(&request.room_id)?;
        let guard = self.bed_guard(&room, &user, &application)?;

        let allocation = Allocation {
            id: AllocationId::new(self.next_id("alloc")),
            user_id: user.id.clone(),
            application_id: application.id.clone(),
            room_id: room.room.id.clone(),
            status: AllocationStatus::Allocated,
            allocated_at: self.now(),
            confirmed_at: None,
        };

        let stored = self.repository.insert_allocation(allocation, guard)?;
        info!(allocation = %stored.id, user = %stored.user_id, room = %stored.room_id, "manual allocation created");
        Ok(stored)
    }

    /// Change an allocation's status and/or room.
    pub fn update_allocation(
        &self,
        id: &AllocationId,
        update: AllocationUpdate,
    ) -> Result<Allocation, HousingError> {
        if update.status.is_none() && update.room_id.is_none() {
            return Err(HousingError::validation("nothing to update"));
        }

        let existing = self
            .repository
            .allocation(id)?
            .ok_or_else(|| HousingError::not_found("allocation", id))?;
        let mut updated = existing.clone();
        let now = self.now();

        if let Some(status) = update.status.filter(|status| *status != existing.status) {
            check_allocation_transition(existing.status, status, AllocationCause::Admin)?;
            match status {
                AllocationStatus::Confirmed => {
                    let application = self.load_application(&existing.application_id)?;
                    check_confirmable(application.payment_status)?;
                    updated.confirmed_at = Some(now);
                }
                AllocationStatus::Allocated => updated.allocated_at = now,
                _ => {}
            }
            updated.status = status;
        }

        if let Some(room_id) = &update.room_id {
            updated.room_id = room_id.clone();
        }

        let moves_into_bed = updated.status.is_active()
            && (!existing.status.is_active() || updated.room_id != existing.room_id);
        let guard = if moves_into_bed {
            let room = self.load_room(&updated.room_id)?;
            let user = self.load_user(&updated.user_id)?;
            let application = self.load_application(&updated.application_id)?;
            Some(self.bed_guard(&room, &user, &application)?)
        } else {
            if updated.room_id != existing.room_id {
                self.load_room(&updated.room_id)?;
            }
            None
        };

        let stored = self
            .repository
            .update_allocation(Swap::new(existing.clone(), updated), guard)?;
        info!(
            allocation = %stored.id,
            from = existing.status.label(),
            to = stored.status.label(),
            room = %stored.room_id,
            "allocation updated"
        );
        Ok(stored)
    }

    /// Remove an allocation, freeing its bed. The application stays as it was
    /// and re-enters the eligible pool.
    pub fn delete_allocation(&self, id: &AllocationId) -> Result<Allocation, HousingError> {
        let removed = self.repository.delete_allocation(id)?;
        info!(allocation = %removed.id, user = %removed.user_id, "allocation deleted");
        Ok(removed)
    }

    /// Admin approve / reject.
    pub fn set_application_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<Application, HousingError> {
        let mut application = self.load_application(id)?;
        check_application_transition(application.application_status, status)?;

        if status == ApplicationStatus::Rejected {
            let holds_bed = self
                .repository
                .allocations_for_application(id)?
                .iter()
                .any(|allocation| allocation.status.is_active());
            if holds_bed {
                return Err(HousingError::validation(
                    "application holds an active allocation; release it before rejecting",
                ));
            }
        }

        let from = application.application_status;
        application.application_status = status;
        self.repository.update_application(application.clone())?;
        info!(application = %id, from = from.label(), to = status.label(), "application status changed");
        Ok(application)
    }

    /// Student submission, gated on the application window.
    pub fn submit_application(
        &self,
        submission: ApplicationSubmission,
    ) -> Result<Application, HousingError> {
        let now = self.now();
        let window = application_window(&self.repository.settings()?, now);
        if !window.is_open {
            return Err(HousingError::validation(window.message));
        }

        let user = self.load_user(&submission.user_id)?;
        if user.account_status != AccountStatus::Active {
            return Err(HousingError::validation("account is not active"));
        }
        let gender = user
            .gender
            .ok_or_else(|| HousingError::validation("gender must be set on the profile before applying"))?;

        let already_applied = self
            .repository
            .applications_for_user(&user.id)?
            .iter()
            .any(|application| application.application_status != ApplicationStatus::Rejected);
        if already_applied {
            return Err(HousingError::validation("an application has already been submitted"));
        }

        if submission.preferences.is_empty() {
            return Err(HousingError::validation("at least one hostel preference is required"));
        }
        let mut seen = BTreeSet::new();
        for hostel_id in &submission.preferences {
            if !seen.insert(hostel_id) {
                return Err(HousingError::validation(format!(
                    "hostel {hostel_id} is listed more than once"
                )));
            }
            let hostel = self
                .repository
                .hostel(hostel_id)?
                .ok_or_else(|| HousingError::not_found("hostel", hostel_id))?;
            if !hostel.is_active {
                return Err(HousingError::validation(format!(
                    "hostel {} is not accepting applications",
                    hostel.name
                )));
            }
            if !hostel.gender.admits(gender) {
                return Err(HousingError::GenderMismatch {
                    hostel: hostel.id,
                    gender,
                });
            }
        }

        if let Some(roommate) = &submission.roommate {
            if roommate == &user.id {
                return Err(HousingError::validation("a student cannot request themselves as roommate"));
            }
            self.load_user(roommate)?;
        }

        let admission_year = user
            .admission_year
            .or_else(|| admission_year_from_matric(&user.matric_no, now))
            .ok_or_else(|| {
                HousingError::validation("academic level cannot be derived from the matric number")
            })?;

        let application = Application {
            id: ApplicationId::new(self.next_id("app")),
            user_id: user.id.clone(),
            preferences: submission.preferences,
            gender,
            level: academic_level(admission_year, now),
            application_status: ApplicationStatus::Pending,
            payment_status: PaymentStatus::Pending,
            roommate: submission.roommate,
            submitted_at: now,
        };

        let stored = self.repository.insert_application(application)?;
        info!(application = %stored.id, user = %stored.user_id, level = stored.level.label(), "application submitted");
        Ok(stored)
    }

    /// Open a payment for an application. Card payments get a checkout link.
    pub fn initiate_payment(
        &self,
        request: PaymentRequest,
    ) -> Result<PaymentInitiation, HousingError> {
        let now = self.now();
        let window = payment_window(&self.repository.settings()?, now);
        if !window.is_open {
            return Err(HousingError::validation(window.message));
        }
        if request.amount == 0 {
            return Err(HousingError::validation("amount must be greater than zero"));
        }

        let application = self.load_application(&request.application_id)?;
        if application.application_status == ApplicationStatus::Rejected {
            return Err(HousingError::validation("rejected applications cannot be paid for"));
        }
        let outstanding = self
            .repository
            .payments_for_application(&application.id)?
            .into_iter()
            .find(|payment| matches!(payment.status, PaymentStatus::Pending | PaymentStatus::Completed));
        if let Some(existing) = outstanding {
            return Err(HousingError::validation(format!(
                "payment {} is already {}",
                existing.reference,
                existing.status.label()
            )));
        }

        let user = self.load_user(&application.user_id)?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let reference = format!("HSTL-{}-{sequence}", now.timestamp_millis());

        let authorization = match request.method {
            PaymentMethod::Card => {
                let mut metadata = BTreeMap::new();
                metadata.insert("userId".to_string(), user.id.to_string());
                metadata.insert("applicationId".to_string(), application.id.to_string());
                metadata.insert("studentName".to_string(), user.name.clone());
                metadata.insert("matricNo".to_string(), user.matric_no.clone());
                Some(self.gateway.initialize(&InitializeRequest {
                    email: user.email.clone(),
                    amount: request.amount,
                    reference: reference.clone(),
                    metadata,
                })?)
            }
            PaymentMethod::BankTransfer => None,
        };

        let payment = Payment {
            id: PaymentId::new(self.next_id("pay")),
            application_id: application.id,
            user_id: user.id,
            amount: request.amount,
            method: request.method,
            status: PaymentStatus::Pending,
            reference,
            transaction_id: None,
            paid_at: None,
            failure_reason: None,
            refund: None,
            created_at: now,
        };
        let payment = self.repository.insert_payment(payment)?;
        info!(payment = %payment.id, reference = %payment.reference, method = ?payment.method, "payment initiated");

        Ok(PaymentInitiation {
            payment,
            authorization,
        })
    }

    /// Manual confirmation: completes the payment and confirms any allocated bed,
    /// all in one write.
    pub fn confirm_payment(&self, id: &PaymentId) -> Result<PaymentUpdateReport, HousingError> {
        let payment = self.load_payment(id)?;
        let now = self.now();

        let allocated: Vec<Allocation> = self
            .repository
            .allocations_for_application(&payment.application_id)?
            .into_iter()
            .filter(|allocation| allocation.status == AllocationStatus::Allocated)
            .collect();

        if payment.status == PaymentStatus::Completed && allocated.is_empty() {
            return Err(HousingError::validation("payment already confirmed"));
        }
        if payment.status != PaymentStatus::Completed {
            check_payment_transition(payment.status, PaymentStatus::Completed)?;
        }

        let mut confirmed_payment = payment.clone();
        confirmed_payment.status = PaymentStatus::Completed;
        confirmed_payment.paid_at = payment.paid_at.or(Some(now));

        let application = self.load_application(&payment.application_id)?;
        let mut paid_application = application.clone();
        paid_application.payment_status = PaymentStatus::Completed;

        let mut swaps = Vec::with_capacity(allocated.len());
        for allocation in allocated {
            check_allocation_transition(
                allocation.status,
                AllocationStatus::Confirmed,
                AllocationCause::Admin,
            )?;
            let mut next = allocation.clone();
            next.status = AllocationStatus::Confirmed;
            next.confirmed_at = Some(now);
            swaps.push(Swap::new(allocation, next));
        }
        let confirmed: Vec<Allocation> = swaps.iter().map(|swap| swap.next.clone()).collect();

        self.apply_coordinated(CoordinatedUpdate {
            payment: Some(Swap::new(payment, confirmed_payment.clone())),
            application: Some(Swap::new(application, paid_application)),
            allocations: swaps,
        })?;

        info!(
            payment = %confirmed_payment.id,
            reference = %confirmed_payment.reference,
            confirmed_allocations = confirmed.len(),
            "payment confirmed"
        );
        Ok(PaymentUpdateReport {
            payment: confirmed_payment,
            allocations: confirmed,
            message: "Payment confirmed".to_string(),
        })
    }

    pub fn reject_payment(
        &self,
        id: &PaymentId,
        reason: &str,
    ) -> Result<PaymentUpdateReport, HousingError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(HousingError::validation("rejection reason is required"));
        }

        let payment = self.load_payment(id)?;
        let failed = self.fail_payment(payment, reason.to_string())?;
        Ok(PaymentUpdateReport {
            payment: failed,
            allocations: Vec::new(),
            message: "Payment rejected".to_string(),
        })
    }

    /// Refund a completed payment and release the bed it paid for. The payment,
    /// the application, and the allocation change together or not at all.
    pub fn refund_payment(
        &self,
        id: &PaymentId,
        reason: &str,
        refunded_by: Option<String>,
    ) -> Result<PaymentUpdateReport, HousingError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(HousingError::validation("refund reason is required"));
        }

        let payment = self.load_payment(id)?;
        check_payment_transition(payment.status, PaymentStatus::Refunded)?;
        let now = self.now();

        let mut refunded = payment.clone();
        refunded.status = PaymentStatus::Refunded;
        refunded.refund = Some(RefundRecord {
            reason: reason.to_string(),
            refunded_at: now,
            refunded_by,
        });

        let application = self.load_application(&payment.application_id)?;
        let mut refunded_application = application.clone();
        refunded_application.payment_status = PaymentStatus::Refunded;

        let mut swaps = Vec::new();
        for allocation in self.repository.allocations_for_application(&payment.application_id)? {
            if !allocation.status.is_active() {
                continue;
            }
            check_allocation_transition(
                allocation.status,
                AllocationStatus::Pending,
                AllocationCause::Refund,
            )?;
            let mut next = allocation.clone();
            next.status = AllocationStatus::Pending;
            next.confirmed_at = None;
            swaps.push(Swap::new(allocation, next));
        }
        let released: Vec<Allocation> = swaps.iter().map(|swap| swap.next.clone()).collect();

        self.apply_coordinated(CoordinatedUpdate {
            payment: Some(Swap::new(payment, refunded.clone())),
            application: Some(Swap::new(application, refunded_application)),
            allocations: swaps,
        })?;

        info!(
            payment = %refunded.id,
            reference = %refunded.reference,
            released_beds = released.len(),
            "payment refunded"
        );
        Ok(PaymentUpdateReport {
            payment: refunded,
            allocations: released,
            message: "Payment refunded successfully. Refund will be processed within 5-7 business days."
                .to_string(),
        })
    }

    /// Authenticate and apply a gateway webhook. Unknown references and events
    /// are acknowledged so the gateway stops retrying.
    pub fn handle_webhook(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookAck, HousingError> {
        if self.webhook_secret.trim().is_empty() {
            warn!("webhook rejected: no signing secret is configured");
            return Err(HousingError::Signature);
        }
        if let Err(err) = verify_signature(&self.webhook_secret, body, signature) {
            warn!(has_signature = signature.is_some(), "webhook signature rejected");
            return Err(err);
        }

        match WebhookEvent::parse(body)? {
            WebhookEvent::ChargeSuccess(charge) => {
                let applied = self.apply_charge(&charge, ChargeOutcome::Success)?;
                Ok(WebhookAck {
                    success: true,
                    event: "charge.success".to_string(),
                    applied,
                })
            }
            WebhookEvent::ChargeFailed(charge) => {
                let applied = self.apply_charge(&charge, ChargeOutcome::Failed)?;
                Ok(WebhookAck {
                    success: true,
                    event: "charge.failed".to_string(),
                    applied,
                })
            }
            WebhookEvent::Unhandled(event) => {
                info!(%event, "ignoring unhandled webhook event");
                Ok(WebhookAck {
                    success: true,
                    event,
                    applied: false,
                })
            }
        }
    }

    /// Ask the gateway for a payment's outcome and record it.
    pub fn verify_payment(&self, reference: &str) -> Result<Payment, HousingError> {
        let payment = self
            .repository
            .payment_by_reference(reference)?
            .ok_or_else(|| HousingError::not_found("payment", reference))?;
        let verification = self.gateway.verify(reference)?;

        let charge = ChargeEvent {
            reference: reference.to_string(),
            transaction_id: verification.transaction_id,
            paid_at: verification.paid_at,
            message: verification.message,
        };
        self.apply_charge(&charge, verification.outcome)?;

        self.load_payment(&payment.id)
    }

    fn apply_charge(&self, charge: &ChargeEvent, outcome: ChargeOutcome) -> Result<bool, HousingError> {
        let Some(payment) = self.repository.payment_by_reference(&charge.reference)? else {
            warn!(reference = %charge.reference, "payment not found for gateway event");
            return Ok(false);
        };

        match (outcome, payment.status) {
            (ChargeOutcome::Success, PaymentStatus::Completed) => {
                info!(reference = %charge.reference, "payment already processed");
                Ok(false)
            }
            (ChargeOutcome::Success, PaymentStatus::Pending) => {
                let mut completed = payment.clone();
                completed.status = PaymentStatus::Completed;
                completed.paid_at = charge.paid_at.or(Some(self.now()));
                completed.transaction_id = charge.transaction_id.clone();

                let application = self.load_application(&completed.application_id)?;
                let mut paid_application = application.clone();
                paid_application.payment_status = PaymentStatus::Completed;

                self.apply_coordinated(CoordinatedUpdate {
                    payment: Some(Swap::new(payment, completed.clone())),
                    application: Some(Swap::new(application, paid_application)),
                    allocations: Vec::new(),
                })?;
                info!(payment = %completed.id, reference = %completed.reference, amount = completed.amount, "payment completed by gateway");
                Ok(true)
            }
            (ChargeOutcome::Failed, PaymentStatus::Pending) => {
                let reason = charge
                    .message
                    .clone()
                    .unwrap_or_else(|| "Payment failed".to_string());
                self.fail_payment(payment, reason)?;
                Ok(true)
            }
            (ChargeOutcome::Pending, _) => Ok(false),
            (_, status) => {
                warn!(
                    reference = %charge.reference,
                    status = status.label(),
                    outcome = ?outcome,
                    "gateway event does not apply to payment in its current state"
                );
                Ok(false)
            }
        }
    }

    fn fail_payment(&self, payment: Payment, reason: String) -> Result<Payment, HousingError> {
        check_payment_transition(payment.status, PaymentStatus::Failed)?;

        let mut failed = payment.clone();
        failed.status = PaymentStatus::Failed;
        failed.failure_reason = Some(reason);

        let application = self.load_application(&failed.application_id)?;
        let application = (application.payment_status == PaymentStatus::Pending).then(|| {
            let mut unpaid = application.clone();
            unpaid.payment_status = PaymentStatus::Failed;
            Swap::new(application, unpaid)
        });

        self.apply_coordinated(CoordinatedUpdate {
            payment: Some(Swap::new(payment, failed.clone())),
            application,
            allocations: Vec::new(),
        })?;
        info!(payment = %failed.id, reference = %failed.reference, "payment failed");
        Ok(failed)
    }

    /// Coordinated write; a record changed under us surfaces as a retryable
    /// [`HousingError::Concurrent`].
    fn apply_coordinated(&self, update: CoordinatedUpdate) -> Result<(), HousingError> {
        self.repository.apply(update).map_err(|err| {
            let err = HousingError::from(err);
            if matches!(err, HousingError::Concurrent { .. }) {
                warn!(error = %err, "coordinated write lost a race; nothing was changed");
            }
            err
        })
    }

    /// Checks that a bed in `room` may be given to `user` and builds the write guard.
    fn bed_guard(
        &self,
        room: &RoomOccupancy,
        user: &User,
        application: &Application,
    ) -> Result<OccupancyGuard, HousingError> {
        if !room.hostel.is_active {
            return Err(HousingError::validation(format!(
                "hostel {} is not active",
                room.hostel.name
            )));
        }
        let gender = user.gender.unwrap_or(application.gender);
        if !room.hostel.gender.admits(gender) {
            return Err(HousingError::GenderMismatch {
                hostel: room.hostel.id.clone(),
                gender,
            });
        }
        if room.remaining() == 0 {
            return Err(HousingError::CapacityExceeded {
                room: room.room.id.clone(),
            });
        }
        Ok(OccupancyGuard {
            room_id: room.room.id.clone(),
            expected_occupancy: room.occupancy,
        })
    }

    /// The user's approved application, else their pending one.
    fn open_application_for(&self, user: &UserId) -> Result<Application, HousingError> {
        let applications = self.repository.applications_for_user(user)?;
        [ApplicationStatus::Approved, ApplicationStatus::Pending]
            .iter()
            .find_map(|status| {
                applications
                    .iter()
                    .find(|application| application.application_status == *status)
                    .cloned()
            })
            .ok_or_else(|| HousingError::validation("no open application found for this student"))
    }

    fn load_user(&self, id: &UserId) -> Result<User, HousingError> {
        self.repository
            .user(id)?
            .ok_or_else(|| HousingError::not_found("user", id))
    }

    fn load_application(&self, id: &ApplicationId) -> Result<Application, HousingError> {
        self.repository
            .application(id)?
            .ok_or_else(|| HousingError::not_found("application", id))
    }

    fn load_room(&self, id: &RoomId) -> Result<RoomOccupancy, HousingError> {
        self.repository
            .room(id)?
            .ok_or_else(|| HousingError::not_found("room", id))
    }

    fn load_payment(&self, id: &PaymentId) -> Result<Payment, HousingError> {
        self.repository
            .payment(id)?
            .ok_or_else(|| HousingError::not_found("payment", id))
    }
}
