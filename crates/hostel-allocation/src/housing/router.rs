use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::Deserialize;

use super::domain::{AllocationId, ApplicationId, ApplicationStatus, PaymentId, UserId};
use super::payments::{PaymentGateway, SIGNATURE_HEADER};
use super::ratelimit::RateLimiter;
use super::report::parse_gender_filter;
use super::repository::HousingRepository;
use super::service::{
    AllocationRunRequest, AllocationUpdate, ApplicationSubmission, HousingService,
    ManualAllocation, PaymentRequest,
};
use crate::error::AppError;

pub const ADMIN_HEADER: &str = "x-admin-id";

/// Shared handler state: the service plus the throttle on allocation runs.
pub struct HousingApi<R, G> {
    pub service: Arc<HousingService<R, G>>,
    pub limiter: RateLimiter,
}

impl<R, G> Clone for HousingApi<R, G> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusChange {
    pub(crate) status: ApplicationStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReasonBody {
    #[serde(default)]
    pub(crate) reason: String,
    #[serde(default)]
    pub(crate) refunded_by: Option<String>,
}

/// `?gender=` (or `?type=`) on the hostel listing.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct HostelQuery {
    #[serde(default, alias = "type")]
    pub(crate) gender: Option<String>,
}

/// Router exposing the housing operations over HTTP.
pub fn housing_router<R, G>(service: Arc<HousingService<R, G>>, limiter: RateLimiter) -> Router
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route(
            "/api/v1/settings/application-status",
            get(application_window_handler::<R, G>),
        )
        .route(
            "/api/v1/settings/payment-status",
            get(payment_window_handler::<R, G>),
        )
        .route("/api/v1/hostels", get(hostels_handler::<R, G>))
        .route(
            "/api/v1/students/:id/status",
            get(student_status_handler::<R, G>),
        )
        .route("/api/v1/applications", post(submit_handler::<R, G>))
        .route(
            "/api/v1/admin/applications/:id/status",
            patch(application_status_handler::<R, G>),
        )
        .route(
            "/api/v1/admin/allocations/run",
            post(run_allocation_handler::<R, G>),
        )
        .route(
            "/api/v1/admin/allocations",
            get(list_allocations_handler::<R, G>).post(create_allocation_handler::<R, G>),
        )
        .route(
            "/api/v1/admin/allocations/:id",
            put(update_allocation_handler::<R, G>).delete(delete_allocation_handler::<R, G>),
        )
        .route("/api/v1/payments", post(initiate_payment_handler::<R, G>))
        .route(
            "/api/v1/admin/payments/:id/confirm",
            post(confirm_payment_handler::<R, G>),
        )
        .route(
            "/api/v1/admin/payments/:id/reject",
            post(reject_payment_handler::<R, G>),
        )
        .route(
            "/api/v1/admin/payments/:id/refund",
            post(refund_payment_handler::<R, G>),
        )
        .route("/api/v1/webhooks/paystack", post(webhook_handler::<R, G>))
        .with_state(HousingApi { service, limiter })
}

fn admin_id(headers: &HeaderMap) -> String {
    headers
        .get(ADMIN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

pub(crate) async fn application_window_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
) -> Response
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    Json(api.service.application_window()).into_response()
}

pub(crate) async fn payment_window_handler<R, G>(State(api): State<HousingApi<R, G>>) -> Response
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    Json(api.service.payment_window()).into_response()
}

pub(crate) async fn hostels_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Query(query): Query<HostelQuery>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let gender = parse_gender_filter(query.gender.as_deref())?;
    let hostels = api.service.hostel_availability(gender)?;
    Ok(Json(hostels).into_response())
}

pub(crate) async fn student_status_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Path(id): Path<String>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let status = api.service.student_status(&UserId::new(id))?;
    Ok(Json(status).into_response())
}

pub(crate) async fn list_allocations_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let allocations = api.service.list_allocations()?;
    Ok(Json(allocations).into_response())
}

pub(crate) async fn submit_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Json(submission): Json<ApplicationSubmission>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let application = api.service.submit_application(submission)?;
    Ok((StatusCode::CREATED, Json(application)).into_response())
}

pub(crate) async fn application_status_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Path(id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let application = api
        .service
        .set_application_status(&ApplicationId::new(id), change.status)?;
    Ok(Json(application).into_response())
}

pub(crate) async fn run_allocation_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    headers: HeaderMap,
    Json(request): Json<AllocationRunRequest>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let admin = admin_id(&headers);
    let decision = api
        .limiter
        .check(&admin, api.service.now())
        .map_err(|err| AppError::Housing(err.into()))?;
    if !decision.allowed {
        tracing::warn!(%admin, "allocation run throttled");
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let report = api.service.run_allocation(request)?;
    Ok(Json(report).into_response())
}

pub(crate) async fn create_allocation_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Json(request): Json<ManualAllocation>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let allocation = api.service.create_allocation(request)?;
    Ok((StatusCode::CREATED, Json(allocation)).into_response())
}

pub(crate) async fn update_allocation_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Path(id): Path<String>,
    Json(update): Json<AllocationUpdate>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let allocation = api
        .service
        .update_allocation(&AllocationId::new(id), update)?;
    Ok(Json(allocation).into_response())
}

pub(crate) async fn delete_allocation_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Path(id): Path<String>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let removed = api.service.delete_allocation(&AllocationId::new(id))?;
    Ok(Json(serde_json::json!({ "success": true, "allocation": removed })).into_response())
}

pub(crate) async fn initiate_payment_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Json(request): Json<PaymentRequest>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let initiation = api.service.initiate_payment(request)?;
    Ok((StatusCode::CREATED, Json(initiation)).into_response())
}

pub(crate) async fn confirm_payment_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Path(id): Path<String>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let report = api.service.confirm_payment(&PaymentId::new(id))?;
    Ok(Json(report).into_response())
}

pub(crate) async fn reject_payment_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Path(id): Path<String>,
    Json(body): Json<ReasonBody>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let report = api.service.reject_payment(&PaymentId::new(id), &body.reason)?;
    Ok(Json(report).into_response())
}

pub(crate) async fn refund_payment_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ReasonBody>,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let refunded_by = body.refunded_by.or_else(|| {
        headers
            .get(ADMIN_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    let report = api
        .service
        .refund_payment(&PaymentId::new(id), &body.reason, refunded_by)?;
    Ok(Json(report).into_response())
}

pub(crate) async fn webhook_handler<R, G>(
    State(api): State<HousingApi<R, G>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError>
where
    R: HousingRepository + 'static,
    G: PaymentGateway + 'static,
{
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let ack = api.service.handle_webhook(&body, signature)?;
    Ok(Json(ack).into_response())
}
