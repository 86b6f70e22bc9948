use crate::cli::ServeArgs;
use crate::infra::{logging_registry, AppState};
use crate::routes::with_lifecycle_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use survey_lifecycle::clock::{Clock, SystemClock};
use survey_lifecycle::config::AppConfig;
use survey_lifecycle::error::AppError;
use survey_lifecycle::lifecycle::{
    ActionDispatcher, LifecycleApi, LifecycleService, Scheduler, StateEngine,
    SurveyRecordImporter, TransitionProcessor,
};
use survey_lifecycle::notifications::{JsonFileStore, NotificationHub};
use survey_lifecycle::telemetry;
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

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(JsonFileStore::new(&config.notifications.store_path));
    let hub = Arc::new(NotificationHub::restore(
        config.notifications.capacity,
        store,
        clock.clone(),
    ));
    let processor = TransitionProcessor::new(
        StateEngine::new(config.lifecycle.policy),
        config.lifecycle.batch_size,
    );
    let service = Arc::new(LifecycleService::new(
        processor,
        ActionDispatcher::new(logging_registry(), hub.clone()),
        clock,
    ));

    if let Some(path) = args.records.take() {
        let records = SurveyRecordImporter::from_path(&path)?;
        info!(count = records.len(), path = %path.display(), "loaded survey records");
        service.update_records(records);
    }

    let scheduler = Scheduler::spawn(service.clone(), config.lifecycle.tick_interval);
    let api = LifecycleApi {
        service,
        triggers: Some(scheduler.trigger()),
    };

    let app = with_lifecycle_routes(api, hub)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "survey lifecycle service ready");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    scheduler.shutdown().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
