use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use crate::housing::domain::{
    AcademicLevel, AccountStatus, Allocation, AllocationId, Application, ApplicationId,
    ApplicationStatus, Gender, Hostel, HostelGender, HostelId, Payment, PaymentId, PaymentMethod,
    PaymentStatus, Room, RoomId, RoomOccupancy, User, UserId,
};
use crate::housing::memory::InMemoryHousingStore;
use crate::housing::payments::{
    Authorization, ChargeOutcome, GatewayError, InitializeRequest, PaymentGateway, Verification,
};
use crate::housing::repository::{
    ApplicationFilter, CoordinatedUpdate, HousingRepository, OccupancyGuard, RepositoryError,
    Swap,
};
use crate::housing::service::{FixedClock, HousingService};
use crate::housing::settings::{
    SettingsSnapshot, APPLICATION_DEADLINE, APPLICATION_START_DATE, PAYMENT_DEADLINE,
    PAYMENT_START_DATE, PRIORITIZE_BY_LEVEL, REGISTRATION_OPEN,
};

pub(super) const WEBHOOK_SECRET: &str = "sk_test_webhook_secret_0001";

pub(super) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 12, 12, 0, 0)
        .single()
        .expect("valid base time")
}

pub(super) fn user(id: &str, gender: Option<Gender>) -> User {
    User {
        id: UserId::new(id),
        name: format!("Student {id}"),
        email: format!("{id}@uniport.edu.ng"),
        matric_no: "U2022/5570001".to_string(),
        gender,
        admission_year: None,
        account_status: AccountStatus::Active,
    }
}

pub(super) fn hostel(id: &str, name: &str, gender: HostelGender) -> Hostel {
    Hostel {
        id: HostelId::new(id),
        name: name.to_string(),
        gender,
        is_active: true,
        location: "Choba Park".to_string(),
    }
}

pub(super) fn room(id: &str, hostel: &str, number: &str, capacity: u32) -> Room {
    Room {
        id: RoomId::new(id),
        hostel_id: HostelId::new(hostel),
        number: number.to_string(),
        capacity,
    }
}

pub(super) fn application(
    id: &str,
    user: &str,
    gender: Gender,
    level: AcademicLevel,
    minutes_after_base: i64,
) -> Application {
    Application {
        id: ApplicationId::new(id),
        user_id: UserId::new(user),
        preferences: Vec::new(),
        gender,
        level,
        application_status: ApplicationStatus::Approved,
        payment_status: PaymentStatus::Completed,
        roommate: None,
        submitted_at: base_time() - Duration::days(5) + Duration::minutes(minutes_after_base),
    }
}

pub(super) fn payment(id: &str, application: &str, user: &str, status: PaymentStatus) -> Payment {
    Payment {
        id: PaymentId::new(id),
        application_id: ApplicationId::new(application),
        user_id: UserId::new(user),
        amount: 5_000_000,
        method: PaymentMethod::BankTransfer,
        status,
        reference: format!("HSTL-REF-{id}"),
        transaction_id: None,
        paid_at: None,
        failure_reason: None,
        refund: None,
        created_at: base_time() - Duration::days(1),
    }
}

/// Settings with both windows open at [`base_time`] and FIFO ordering.
pub(super) fn seed_open_windows(store: &InMemoryHousingStore) {
    for (key, value) in [
        (APPLICATION_START_DATE, json!("2025-10-01T00:00")),
        (APPLICATION_DEADLINE, json!("\"2025-10-31T23:59:00.000Z\"")),
        (REGISTRATION_OPEN, json!("true")),
        (PAYMENT_START_DATE, json!({ "startDate": "2025-10-02" })),
        (PAYMENT_DEADLINE, json!({ "deadline": "2025-11-15T00:00" })),
        (PRIORITIZE_BY_LEVEL, json!(false)),
    ] {
        store.put_setting(key, value).expect("setting stored");
    }
}

/// Two MALE rooms of two beds in "Alpha" and one FEMALE room of two beds in "Beta".
pub(super) fn seed_campus(store: &InMemoryHousingStore) {
    store
        .put_hostel(hostel("h-alpha", "Alpha", HostelGender::Male))
        .expect("hostel stored");
    store
        .put_hostel(hostel("h-beta", "Beta", HostelGender::Female))
        .expect("hostel stored");
    store
        .put_room(room("r-a101", "h-alpha", "101", 2))
        .expect("room stored");
    store
        .put_room(room("r-a102", "h-alpha", "102", 2))
        .expect("room stored");
    store
        .put_room(room("r-b201", "h-beta", "201", 2))
        .expect("room stored");
}

/// Scenario fixture: five paid MALE applications in FIFO order and one FEMALE.
pub(super) fn seed_applicants(store: &InMemoryHousingStore) {
    for n in 1..=5 {
        let id = format!("m{n}");
        store
            .put_user(user(&id, Some(Gender::Male)))
            .expect("user stored");
        store
            .insert_application(application(
                &format!("app-{id}"),
                &id,
                Gender::Male,
                AcademicLevel::Year1,
                n,
            ))
            .expect("application stored");
    }
    store
        .put_user(user("f1", Some(Gender::Female)))
        .expect("user stored");
    store
        .insert_application(application(
            "app-f1",
            "f1",
            Gender::Female,
            AcademicLevel::Year2,
            10,
        ))
        .expect("application stored");
}

pub(super) fn seeded_store() -> Arc<InMemoryHousingStore> {
    let store = Arc::new(InMemoryHousingStore::default());
    seed_open_windows(&store);
    seed_campus(&store);
    seed_applicants(&store);
    store
}

pub(super) fn build_service<R>(
    store: Arc<R>,
) -> (HousingService<R, RecordingGateway>, Arc<RecordingGateway>)
where
    R: HousingRepository + 'static,
{
    let gateway = Arc::new(RecordingGateway::default());
    let service = HousingService::new(store, gateway.clone(), WEBHOOK_SECRET)
        .with_clock(Arc::new(FixedClock(base_time())));
    (service, gateway)
}

pub(super) fn occupancy(store: &InMemoryHousingStore, room: &str) -> u32 {
    store
        .room(&RoomId::new(room))
        .expect("room read")
        .expect("room exists")
        .occupancy
}

/// Every allocation invariant over the whole store.
pub(super) fn assert_invariants(store: &InMemoryHousingStore) {
    let rooms = store.rooms_in_active_hostels().expect("rooms read");
    for view in &rooms {
        assert!(
            view.occupancy <= view.room.capacity,
            "room {} over capacity",
            view.room.id
        );
    }

    let active = store.active_allocations().expect("allocations read");
    let mut users: Vec<&UserId> = active.iter().map(|allocation| &allocation.user_id).collect();
    users.sort();
    let before = users.len();
    users.dedup();
    assert_eq!(before, users.len(), "a user holds two beds");

    for allocation in &active {
        let view: RoomOccupancy = store
            .room(&allocation.room_id)
            .expect("room read")
            .expect("room exists");
        let user = store
            .user(&allocation.user_id)
            .expect("user read")
            .expect("user exists");
        let gender = user.gender.expect("allocated users have a gender");
        assert!(view.hostel.gender.admits(gender), "gender mismatch");
    }
}

pub(super) fn allocation_for(store: &InMemoryHousingStore, application: &str) -> Option<Allocation> {
    store
        .allocations_for_application(&ApplicationId::new(application))
        .expect("allocations read")
        .into_iter()
        .next()
}

#[derive(Default)]
pub(super) struct RecordingGateway {
    pub(super) initialized: Mutex<Vec<InitializeRequest>>,
    pub(super) outcome: Mutex<Option<ChargeOutcome>>,
}

impl RecordingGateway {
    pub(super) fn requests(&self) -> Vec<InitializeRequest> {
        self.initialized.lock().expect("gateway mutex poisoned").clone()
    }

    pub(super) fn set_outcome(&self, outcome: ChargeOutcome) {
        *self.outcome.lock().expect("gateway mutex poisoned") = Some(outcome);
    }
}

impl PaymentGateway for RecordingGateway {
    fn initialize(&self, request: &InitializeRequest) -> Result<Authorization, GatewayError> {
        self.initialized
            .lock()
            .expect("gateway mutex poisoned")
            .push(request.clone());
        Ok(Authorization {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: "ACCESS".to_string(),
            reference: request.reference.clone(),
            demo: false,
        })
    }

    fn verify(&self, reference: &str) -> Result<Verification, GatewayError> {
        let outcome = *self.outcome.lock().expect("gateway mutex poisoned");
        match outcome {
            Some(outcome) => Ok(Verification {
                outcome,
                paid_at: Some(base_time()),
                transaction_id: Some(format!("TX-{reference}")),
                message: Some("Declined".to_string()),
            }),
            None => Err(GatewayError::Unavailable("no outcome scripted".to_string())),
        }
    }
}

type ApplyHook = Box<dyn FnOnce() + Send>;

/// Store wrapper that can fail coordinated writes or every read, or run
/// another writer just before the next coordinated write lands.
pub(super) struct FaultyStore {
    pub(super) inner: Arc<InMemoryHousingStore>,
    pub(super) fail_apply: bool,
    pub(super) fail_settings: bool,
    before_apply: Mutex<Option<ApplyHook>>,
}

impl FaultyStore {
    fn wrapping(inner: Arc<InMemoryHousingStore>) -> Self {
        Self {
            inner,
            fail_apply: false,
            fail_settings: false,
            before_apply: Mutex::new(None),
        }
    }

    pub(super) fn failing_apply(inner: Arc<InMemoryHousingStore>) -> Self {
        Self {
            fail_apply: true,
            ..Self::wrapping(inner)
        }
    }

    pub(super) fn failing_settings(inner: Arc<InMemoryHousingStore>) -> Self {
        Self {
            fail_settings: true,
            ..Self::wrapping(inner)
        }
    }

    /// `hook` runs once, between the caller's reads and its coordinated write.
    pub(super) fn interleaving(
        inner: Arc<InMemoryHousingStore>,
        hook: impl FnOnce() + Send + 'static,
    ) -> Self {
        let store = Self::wrapping(inner);
        *store.before_apply.lock().expect("hook mutex poisoned") = Some(Box::new(hook));
        store
    }
}

fn offline() -> RepositoryError {
    RepositoryError::Unavailable("database offline".to_string())
}

impl HousingRepository for FaultyStore {
    fn settings(&self) -> Result<SettingsSnapshot, RepositoryError> {
        if self.fail_settings {
            return Err(offline());
        }
        self.inner.settings()
    }

    fn user(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        self.inner.user(id)
    }

    fn hostel(&self, id: &HostelId) -> Result<Option<Hostel>, RepositoryError> {
        self.inner.hostel(id)
    }

    fn hostels(&self) -> Result<Vec<Hostel>, RepositoryError> {
        self.inner.hostels()
    }

    fn room(&self, id: &RoomId) -> Result<Option<RoomOccupancy>, RepositoryError> {
        self.inner.room(id)
    }

    fn rooms_in_active_hostels(&self) -> Result<Vec<RoomOccupancy>, RepositoryError> {
        self.inner.rooms_in_active_hostels()
    }

    fn application(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.application(id)
    }

    fn applications(
        &self,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>, RepositoryError> {
        self.inner.applications(filter)
    }

    fn applications_for_user(&self, user: &UserId) -> Result<Vec<Application>, RepositoryError> {
        self.inner.applications_for_user(user)
    }

    fn insert_application(
        &self,
        application: Application,
    ) -> Result<Application, RepositoryError> {
        self.inner.insert_application(application)
    }

    fn update_application(&self, application: Application) -> Result<(), RepositoryError> {
        self.inner.update_application(application)
    }

    fn allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, RepositoryError> {
        self.inner.allocation(id)
    }

    fn active_allocations(&self) -> Result<Vec<Allocation>, RepositoryError> {
        self.inner.active_allocations()
    }

    fn allocations(&self) -> Result<Vec<Allocation>, RepositoryError> {
        self.inner.allocations()
    }

    fn allocations_for_user(&self, user: &UserId) -> Result<Vec<Allocation>, RepositoryError> {
        self.inner.allocations_for_user(user)
    }

    fn allocations_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<Allocation>, RepositoryError> {
        self.inner.allocations_for_application(id)
    }

    fn insert_allocation(
        &self,
        allocation: Allocation,
        guard: OccupancyGuard,
    ) -> Result<Allocation, RepositoryError> {
        self.inner.insert_allocation(allocation, guard)
    }

    fn update_allocation(
        &self,
        swap: Swap<Allocation>,
        guard: Option<OccupancyGuard>,
    ) -> Result<Allocation, RepositoryError> {
        self.inner.update_allocation(swap, guard)
    }

    fn delete_allocation(&self, id: &AllocationId) -> Result<Allocation, RepositoryError> {
        self.inner.delete_allocation(id)
    }

    fn payment(&self, id: &PaymentId) -> Result<Option<Payment>, RepositoryError> {
        self.inner.payment(id)
    }

    fn payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, RepositoryError> {
        self.inner.payment_by_reference(reference)
    }

    fn payments_for_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Vec<Payment>, RepositoryError> {
        self.inner.payments_for_application(id)
    }

    fn insert_payment(&self, payment: Payment) -> Result<Payment, RepositoryError> {
        self.inner.insert_payment(payment)
    }

    fn apply(&self, update: CoordinatedUpdate) -> Result<(), RepositoryError> {
        if self.fail_apply {
            return Err(offline());
        }
        let hook = self.before_apply.lock().expect("hook mutex poisoned").take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.apply(update)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
