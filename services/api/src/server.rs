use crate::cli::ServeArgs;
use crate::infra::{AppState, LocalDocumentStore, QueuedNotifier};
use crate::routes::with_membership_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use fti_membership::config::AppConfig;
use fti_membership::error::AppError;
use fti_membership::telemetry;
use fti_membership::workflows::membership::{
    InMemoryMembershipStore, MembershipService, RetryingStore,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

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
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(RetryingStore::new(
        InMemoryMembershipStore::new(),
        config.workflow.store_retry,
    ));
    let notifier = Arc::new(QueuedNotifier::spawn());
    let documents = Arc::new(LocalDocumentStore::new(&config.documents));
    let service = Arc::new(MembershipService::new(
        store,
        notifier,
        documents,
        &config.workflow,
    ));

    let app = with_membership_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        resubmission_mode = ?config.workflow.resubmission_mode,
        "membership service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
