use crate::cli::ServeArgs;
use crate::infra::{build_service, load_store, AppState};
use crate::routes::with_turno_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use turnos::config::AppConfig;
use turnos::error::AppError;
use turnos::telemetry;
use turnos::workflows::turnos::run_sweeper;
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

    if config.identity_pepper.is_empty() {
        warn!("TURNOS_IDENTITY_PEPPER is empty; identity hashes are unsalted");
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = load_store(args.inventory_csv.as_deref())?;
    let service = Arc::new(build_service(
        &config,
        store,
        Arc::new(mockable::DefaultClock),
    ));

    let sweeper = Arc::new(service.sweeper(config.sweep.clone()));
    tokio::spawn(run_sweeper(sweeper, config.sweep.interval));

    let app = with_turno_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        sweep_cutoff = %config.sweep.cutoff,
        "turno service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
