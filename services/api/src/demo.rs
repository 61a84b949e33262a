use crate::infra::{parse_instant, seed_demo_campus};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use hostel_allocation::error::AppError;
use hostel_allocation::housing::{
    AllocationRunReport, AllocationRunRequest, ApplicationId, DemoGateway, FixedClock,
    HousingError, HousingRepository, HousingService, InMemoryHousingStore, Payment, PaymentId,
    PaymentMethod, PaymentStatus, WindowKind, WindowReport,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum WindowTarget {
    Application,
    Payment,
}

impl From<WindowTarget> for WindowKind {
    fn from(value: WindowTarget) -> Self {
        match value {
            WindowTarget::Application => WindowKind::Application,
            WindowTarget::Payment => WindowKind::Payment,
        }
    }
}

#[derive(Args, Debug)]
pub(crate) struct WindowArgs {
    /// Which window the dates describe
    #[arg(long, value_enum, default_value = "application")]
    pub(crate) kind: WindowTarget,
    /// Window start (RFC 3339, YYYY-MM-DDTHH:MM, or YYYY-MM-DD)
    #[arg(long, value_parser = parse_instant)]
    pub(crate) start: Option<DateTime<Utc>>,
    /// Window deadline, same formats as --start
    #[arg(long, value_parser = parse_instant)]
    pub(crate) deadline: Option<DateTime<Utc>>,
    /// Registration override; only `false` closes an otherwise open window
    #[arg(long = "override")]
    pub(crate) open_override: Option<bool>,
    /// Evaluation instant (defaults to now)
    #[arg(long, value_parser = parse_instant)]
    pub(crate) now: Option<DateTime<Utc>>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Evaluation instant for the walkthrough (defaults to now)
    #[arg(long, value_parser = parse_instant)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Stop after the first allocation run
    #[arg(long)]
    pub(crate) skip_refund: bool,
}

pub(crate) fn run_window(args: WindowArgs) -> Result<(), AppError> {
    let now = args.now.unwrap_or_else(Utc::now);
    render_window(&window_report(&args, now), now);
    Ok(())
}

/// The registration override only exists for the application window.
fn window_report(args: &WindowArgs, now: DateTime<Utc>) -> WindowReport {
    let override_flag = match args.kind {
        WindowTarget::Application => args.open_override,
        WindowTarget::Payment => None,
    };
    WindowReport::evaluate(args.kind.into(), now, args.start, args.deadline, override_flag)
}

fn render_window(report: &WindowReport, now: DateTime<Utc>) {
    println!("Window evaluated at {}", now.to_rfc3339());
    println!("- status: {} (open: {})", report.status.label(), report.is_open);
    match report.start_date {
        Some(start) => println!("- start: {}", start.to_rfc3339()),
        None => println!("- start: not set"),
    }
    match report.deadline {
        Some(deadline) => println!("- deadline: {}", deadline.to_rfc3339()),
        None => println!("- deadline: not set"),
    }
    println!("- message: {}", report.message);
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let now = args.now.unwrap_or_else(Utc::now);
    let store = Arc::new(InMemoryHousingStore::default());
    seed_demo_campus(&store, now).map_err(|err| AppError::Housing(err.into()))?;

    let service = HousingService::new(
        store.clone(),
        Arc::new(DemoGateway::new("http://localhost:5173")),
        "demo-webhook-secret",
    )
    .with_clock(Arc::new(FixedClock(now)));

    println!("Hostel allocation demo");
    render_window(&service.application_window(), now);
    render_rooms(&store)?;

    println!("\nAllocation run (first come, first served)");
    let report = service.run_allocation(AllocationRunRequest::default())?;
    render_run(&report);
    render_rooms(&store)?;

    if args.skip_refund {
        return Ok(());
    }

    let Some(first) = report.allocations.first() else {
        println!("\nNo allocation to refund");
        return Ok(());
    };

    println!("\nRefund walkthrough for {}", first.user_id);
    let payment_id = seed_payment(&store, &first.application_id, now)?;
    let confirmed = service.confirm_payment(&payment_id)?;
    println!(
        "- {} ({} allocation(s) confirmed)",
        confirmed.message,
        confirmed.allocations.len()
    );
    let refund = service.refund_payment(
        &payment_id,
        "Student withdrew before resumption",
        Some("demo-admin".to_string()),
    )?;
    println!("- {}", refund.message);
    for allocation in &refund.allocations {
        println!(
            "  allocation {} -> {} (room {})",
            allocation.id,
            allocation.status.label(),
            allocation.room_id
        );
    }
    render_rooms(&store)?;

    println!("\nSecond allocation run");
    let rerun = service.run_allocation(AllocationRunRequest::default())?;
    render_run(&rerun);
    render_rooms(&store)?;

    Ok(())
}

fn seed_payment(
    store: &InMemoryHousingStore,
    application: &ApplicationId,
    now: DateTime<Utc>,
) -> Result<PaymentId, AppError> {
    let record = store
        .application(application)
        .map_err(|err| AppError::Housing(err.into()))?
        .ok_or_else(|| AppError::Housing(HousingError::not_found("application", application)))?;

    let payment = Payment {
        id: PaymentId::new(format!("pay-{}", record.user_id)),
        application_id: record.id.clone(),
        user_id: record.user_id.clone(),
        amount: 5_000_000,
        method: PaymentMethod::BankTransfer,
        status: PaymentStatus::Completed,
        reference: format!("HSTL-DEMO-{}", record.user_id),
        transaction_id: None,
        paid_at: Some(now),
        failure_reason: None,
        refund: None,
        created_at: now,
    };
    let stored = store
        .insert_payment(payment)
        .map_err(|err| AppError::Housing(err.into()))?;
    Ok(stored.id)
}

fn render_run(report: &AllocationRunReport) {
    println!("- {}", report.message);
    println!(
        "  considered {} | allocated {} | unmatched {} | skipped {} | failed {}",
        report.total_considered,
        report.allocated_count,
        report.unmatched,
        report.skipped,
        report.failed
    );
    for allocation in &report.allocations {
        println!("  {} -> room {}", allocation.user_id, allocation.room_id);
    }
}

fn render_rooms(store: &InMemoryHousingStore) -> Result<(), AppError> {
    let rooms = store
        .rooms_in_active_hostels()
        .map_err(|err| AppError::Housing(err.into()))?;
    println!("Rooms:");
    for view in rooms {
        println!(
            "  {} {} ({:?}): {}/{} beds taken",
            view.hostel.name,
            view.room.number,
            view.hostel.gender,
            view.occupancy,
            view.room.capacity
        );
    }
    Ok(())
}
