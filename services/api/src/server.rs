use crate::cli::ServeArgs;
use crate::infra::{seed_demo_campus, AppState};
use crate::routes::with_service_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use hostel_allocation::config::AppConfig;
use hostel_allocation::error::AppError;
use hostel_allocation::housing::{DemoGateway, HousingService, InMemoryHousingStore, RateLimiter};
use hostel_allocation::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryHousingStore::default());
    if args.seed_demo {
        seed_demo_campus(&store, Utc::now()).map_err(|err| AppError::Housing(err.into()))?;
        info!("seeded demo campus");
    }

    if config.payments.is_live() {
        warn!("gateway key configured but only the demo gateway is built in; checkout links are demo links");
    } else {
        info!("payments running in demo mode");
    }
    if !config.payments.has_webhook_secret() {
        warn!("PAYSTACK_SECRET_KEY is not set; every payment webhook will be rejected");
    }
    let gateway = Arc::new(DemoGateway::new(config.payments.frontend_url.clone()));

    let service = Arc::new(HousingService::new(
        store,
        gateway,
        config.payments.secret_key.clone(),
    ));
    let limiter = RateLimiter::in_memory(config.rate_limit.max_requests, config.rate_limit.window);

    let app = with_service_routes(service, limiter)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "hostel allocation service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
