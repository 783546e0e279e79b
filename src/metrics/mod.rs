use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref COMMITTED_WRITES: IntCounterVec = IntCounterVec::new(
        Opts::new("committed_writes", "accepted write_cas/delete_cas calls"),
        &["operation"]
    )
    .expect("metric can not be created");

    pub static ref CAS_CONFLICTS: IntCounter =
        IntCounter::new("cas_conflicts", "writes rejected because of a version mismatch")
            .expect("metric can not be created");

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge =
        IntGauge::new("active_subscriptions", "subscriptions attached to the publisher")
            .expect("metric can not be created");

    pub static ref DELIVERED_EVENTS: IntCounter =
        IntCounter::new("delivered_events", "change events handed to subscription channels")
            .expect("metric can not be created");

    pub static ref CLOSED_SUBSCRIPTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("closed_subscriptions", "subscriptions torn down, by reason"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry =
        Registry::new_custom(Some("rstore".to_string()), None).expect("registry can be created");
}

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(COMMITTED_WRITES.clone()),
        Box::new(CAS_CONFLICTS.clone()),
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
        Box::new(DELIVERED_EVENTS.clone()),
        Box::new(CLOSED_SUBSCRIPTIONS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            // AlreadyReg is expected when the server is started twice in one process
            info!("metric collector not registered: {}", e);
        }
    }
}

/// Serves `/metrics` on `port` until `shutdown` is cancelled.
pub async fn start_server(
    port: u16,
    shutdown: CancellationToken,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    info!(port, "Metrics server listening");
    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            shutdown.cancelled().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text())
}

/// Text exposition of every registered collector.
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
