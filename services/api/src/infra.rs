use chrono::{DateTime, Duration, Utc};
use hostel_allocation::housing::settings::{
    try_normalize_date_setting, APPLICATION_DEADLINE, APPLICATION_START_DATE, PAYMENT_DEADLINE,
    PAYMENT_START_DATE, PRIORITY_ORDER, REGISTRATION_OPEN,
};
use hostel_allocation::housing::{
    AcademicLevel, AccountStatus, Application, ApplicationId, ApplicationStatus, Gender, Hostel,
    HostelGender, HostelId, HousingRepository, InMemoryHousingStore, PaymentStatus,
    RepositoryError, Room, RoomId, User, UserId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Accepts anything the settings store accepts: RFC 3339, `YYYY-MM-DDTHH:MM`, or a bare date.
pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    match try_normalize_date_setting(&json!(raw)) {
        Ok(Some(instant)) => Ok(instant),
        Ok(None) => Err("empty date".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

/// Seed a small campus: windows open around `now`, two male rooms, one female room,
/// five approved and paid male applicants and one female applicant.
pub(crate) fn seed_demo_campus(
    store: &InMemoryHousingStore,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let stamp = |instant: DateTime<Utc>| json!(instant.format("%Y-%m-%dT%H:%M").to_string());
    store.put_setting(APPLICATION_START_DATE, stamp(now - Duration::days(7)))?;
    store.put_setting(APPLICATION_DEADLINE, stamp(now + Duration::days(21)))?;
    store.put_setting(REGISTRATION_OPEN, json!(true))?;
    store.put_setting(PAYMENT_START_DATE, stamp(now - Duration::days(7)))?;
    store.put_setting(PAYMENT_DEADLINE, stamp(now + Duration::days(30)))?;
    store.put_setting(PRIORITY_ORDER, json!("submission_only"))?;

    for (id, name, gender) in [
        ("hostel-male", "Amina Hall", HostelGender::Male),
        ("hostel-female", "Bello Hall", HostelGender::Female),
    ] {
        store.put_hostel(Hostel {
            id: HostelId::new(id),
            name: name.to_string(),
            gender,
            is_active: true,
            location: "Main campus".to_string(),
        })?;
    }

    for (id, hostel, number) in [
        ("room-m-101", "hostel-male", "101"),
        ("room-m-102", "hostel-male", "102"),
        ("room-f-201", "hostel-female", "201"),
    ] {
        store.put_room(Room {
            id: RoomId::new(id),
            hostel_id: HostelId::new(hostel),
            number: number.to_string(),
            capacity: 2,
        })?;
    }

    let applicants = (1..=5)
        .map(|n| (format!("male-{n}"), Gender::Male))
        .chain(std::iter::once(("female-1".to_string(), Gender::Female)));
    for (order, (user_id, gender)) in applicants.enumerate() {
        store.put_user(User {
            id: UserId::new(user_id.as_str()),
            name: format!("Demo {user_id}"),
            email: format!("{user_id}@demo.example.edu"),
            matric_no: "U2023/5570001".to_string(),
            gender: Some(gender),
            admission_year: Some(2023),
            account_status: AccountStatus::Active,
        })?;
        store.insert_application(Application {
            id: ApplicationId::new(format!("app-{user_id}")),
            user_id: UserId::new(user_id.as_str()),
            preferences: Vec::new(),
            gender,
            level: AcademicLevel::Year2,
            application_status: ApplicationStatus::Approved,
            payment_status: PaymentStatus::Completed,
            roommate: None,
            submitted_at: now - Duration::days(3) + Duration::minutes(order as i64),
        })?;
    }

    Ok(())
}
