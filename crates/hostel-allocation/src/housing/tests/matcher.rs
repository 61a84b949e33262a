use super::common::{
    allocation_for, application, assert_invariants, base_time, build_service, hostel, occupancy,
    room, seeded_store, user,
};
use crate::housing::capacity::RoomCapacityIndex;
use crate::housing::domain::{
    AcademicLevel, Allocation, AllocationId, AllocationStatus, ApplicationId, Gender, HostelGender,
    HostelId, RoomId, UserId,
};
use crate::housing::eligibility::{select_candidates, EligibilityRequest, PriorityOrder};
use crate::housing::matcher::match_candidates;
use crate::housing::repository::{HousingRepository, OccupancyGuard};
use crate::housing::service::AllocationRunRequest;
use crate::housing::settings::{AllocationSettings, AllocationSettingsPatch};

fn fifo_request() -> EligibilityRequest {
    EligibilityRequest {
        application_ids: None,
        order: PriorityOrder::SubmissionOnly,
        cap: 50,
    }
}

#[test]
fn fills_rooms_in_priority_order_and_reports_unmatched() {
    let store = seeded_store();
    let (service, _) = build_service(store.clone());

    let report = service
        .run_allocation(AllocationRunRequest::default())
        .expect("run succeeds");

    assert_eq!(report.total_considered, 6);
    assert_eq!(report.allocated_count, 5);
    assert_eq!(report.unmatched, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.message, "Successfully allocated 5 students");

    let room_of = |app: &str| allocation_for(&store, app).map(|allocation| allocation.room_id);
    assert_eq!(room_of("app-m1"), Some(RoomId::new("r-a101")));
    assert_eq!(room_of("app-m2"), Some(RoomId::new("r-a101")));
    assert_eq!(room_of("app-m3"), Some(RoomId::new("r-a102")));
    assert_eq!(room_of("app-m4"), Some(RoomId::new("r-a102")));
    assert_eq!(room_of("app-m5"), None);
    assert_eq!(room_of("app-f1"), Some(RoomId::new("r-b201")));

    assert_eq!(occupancy(&store, "r-a101"), 2);
    assert_eq!(occupancy(&store, "r-b201"), 1);
    assert_invariants(&store);
}

#[test]
fn rerunning_without_new_capacity_allocates_nothing() {
    let store = seeded_store();
    let (service, _) = build_service(store.clone());
    service
        .run_allocation(AllocationRunRequest::default())
        .expect("first run");

    let second = service
        .run_allocation(AllocationRunRequest::default())
        .expect("second run");

    assert_eq!(second.allocated_count, 0);
    assert_eq!(second.total_considered, 1);
    assert_eq!(second.unmatched, 1);
    assert_eq!(store.active_allocations().expect("read").len(), 5);
    assert_invariants(&store);
}

#[test]
fn restricting_to_application_ids_ignores_everyone_else() {
    let store = seeded_store();
    let (service, _) = build_service(store.clone());

    let report = service
        .run_allocation(AllocationRunRequest {
            settings: AllocationSettingsPatch::default(),
            application_ids: Some(vec![ApplicationId::new("app-m5"), ApplicationId::new("app-f1")]),
        })
        .expect("run succeeds");

    assert_eq!(report.allocated_count, 2);
    assert_eq!(
        allocation_for(&store, "app-m5").map(|allocation| allocation.room_id),
        Some(RoomId::new("r-a101"))
    );
    assert!(allocation_for(&store, "app-m1").is_none());
}

#[test]
fn per_run_cap_limits_candidates() {
    let store = seeded_store();
    let (service, _) = build_service(store.clone());

    let report = service
        .run_allocation(AllocationRunRequest {
            settings: AllocationSettingsPatch {
                max_allocations_per_run: Some(2),
                ..AllocationSettingsPatch::default()
            },
            application_ids: None,
        })
        .expect("run succeeds");

    assert_eq!(report.total_considered, 2);
    assert_eq!(report.allocated_count, 2);
}

#[test]
fn level_ordering_puts_seniors_first() {
    let store = seeded_store();
    store
        .put_user(user("m-senior", Some(Gender::Male)))
        .expect("user stored");
    store
        .insert_application(application(
            "app-m-senior",
            "m-senior",
            Gender::Male,
            AcademicLevel::Year4,
            100,
        ))
        .expect("application stored");
    let (service, _) = build_service(store.clone());

    let report = service
        .run_allocation(AllocationRunRequest {
            settings: AllocationSettingsPatch {
                priority_order: Some(PriorityOrder::LevelThenSubmission),
                ..AllocationSettingsPatch::default()
            },
            application_ids: None,
        })
        .expect("run succeeds");

    assert_eq!(report.allocations[0].application_id, ApplicationId::new("app-m-senior"));
    assert_eq!(report.allocated_count, 5);
    // The latest first-year submission loses its bed to the senior.
    assert!(allocation_for(&store, "app-m5").is_none());
    assert!(allocation_for(&store, "app-m4").is_none());
}

#[test]
fn preferred_hostel_wins_over_index_order() {
    let store = seeded_store();
    store
        .put_hostel(hostel("h-mixed", "Zulu", HostelGender::Mixed))
        .expect("hostel stored");
    store
        .put_room(room("r-z1", "h-mixed", "1", 1))
        .expect("room stored");

    let mut preferring = store
        .application(&ApplicationId::new("app-m3"))
        .expect("read")
        .expect("exists");
    preferring.preferences = vec![HostelId::new("h-mixed")];
    store.update_application(preferring).expect("updated");

    let (service, _) = build_service(store.clone());
    service
        .run_allocation(AllocationRunRequest::default())
        .expect("run succeeds");

    assert_eq!(
        allocation_for(&store, "app-m3").map(|allocation| allocation.room_id),
        Some(RoomId::new("r-z1"))
    );
    assert_eq!(
        allocation_for(&store, "app-m5").map(|allocation| allocation.room_id),
        Some(RoomId::new("r-a102"))
    );
    assert_invariants(&store);
}

#[test]
fn missing_gender_is_skipped_not_fatal() {
    let store = seeded_store();
    store
        .put_user(user("m2", None))
        .expect("profile without gender");
    let (service, _) = build_service(store.clone());

    let report = service
        .run_allocation(AllocationRunRequest::default())
        .expect("run succeeds");

    assert_eq!(report.skipped, 1);
    assert_eq!(report.allocated_count, 5);
    assert!(allocation_for(&store, "app-m2").is_none());
}

#[test]
fn stale_snapshot_counts_a_failure_and_retires_the_room() {
    let store = seeded_store();
    let settings = AllocationSettings::from_snapshot(&store.settings().expect("settings"));
    assert_eq!(settings.max_allocations_per_run, 50);
    let candidates = select_candidates(store.as_ref(), &fifo_request()).expect("candidates");
    let mut index = RoomCapacityIndex::load(store.as_ref()).expect("index");

    // Another writer takes a bed in room 101 after the snapshot was read.
    store
        .put_user(user("walk-in", Some(Gender::Male)))
        .expect("user stored");
    store
        .insert_application(application("app-walk-in", "walk-in", Gender::Male, AcademicLevel::Year1, 0))
        .expect("application stored");
    store
        .insert_allocation(
            Allocation {
                id: AllocationId::new("alloc-walk-in"),
                user_id: UserId::new("walk-in"),
                application_id: ApplicationId::new("app-walk-in"),
                room_id: RoomId::new("r-a101"),
                status: AllocationStatus::Allocated,
                allocated_at: base_time(),
                confirmed_at: None,
            },
            OccupancyGuard {
                room_id: RoomId::new("r-a101"),
                expected_occupancy: 0,
            },
        )
        .expect("concurrent write");

    let mut counter = 0;
    let report = match_candidates(store.as_ref(), candidates, &mut index, base_time(), || {
        counter += 1;
        AllocationId::new(format!("alloc-test-{counter}"))
    });

    assert_eq!(report.failed, 1);
    assert_eq!(index.remaining(&RoomId::new("r-a101")), Some(0));
    // m1 conflicted, m2 and m3 fill 102, m4 and m5 find nothing left.
    assert!(allocation_for(&store, "app-m1").is_none());
    assert_eq!(occupancy(&store, "r-a101"), 1);
    assert_eq!(occupancy(&store, "r-a102"), 2);
    assert_eq!(report.unmatched, 2);
    assert_invariants(&store);
}
