use crate::cli::ServeArgs;
use crate::infra::{open_store, renderer, AppState, DemoFixture, LocalIssuer, LoggingDispatcher};
use crate::routes::with_platform_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use procurement::config::AppConfig;
use procurement::error::AppError;
use procurement::telemetry;
use procurement::workflows::comparison::ComparisonService;
use std::sync::atomic::{AtomicBool, Ordering};
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
    if let Some(database) = args.database.take() {
        config.comparison.database_path = Some(database);
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let now = Utc::now();
    let fixture = args.seed_demo.then(|| DemoFixture::build(now));
    let store = open_store(config.comparison.database_path.as_deref(), fixture.as_ref())?;
    let service = Arc::new(ComparisonService::new(
        store,
        renderer(&config.comparison),
        Arc::new(LoggingDispatcher::default()),
        Arc::new(LocalIssuer::default()),
        &config.comparison,
    ));

    if let Some(fixture) = fixture {
        // Leave the last vendor open so the comparison can still be exercised over HTTP.
        let open_vendors = fixture.sessions.len().saturating_sub(1);
        for session in fixture.sessions.into_iter().take(open_vendors) {
            if let Err(err) = service.record_negotiation(session, now).await {
                warn!(error = %err, "demo negotiation could not be recorded");
            }
        }
        info!(requisition_id = DemoFixture::REQUISITION, "demo requisition seeded");
    }

    let scheduler = if config.comparison.scheduler_enabled {
        Some(service.scheduler().spawn())
    } else {
        info!("deadline scheduler disabled");
        None
    };

    let app = with_platform_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "vendor comparison service ready");

    let served = axum::serve(listener, app).await;
    if let Some(scheduler) = scheduler {
        scheduler.abort();
    }
    served?;
    Ok(())
}
