use std::sync::Arc;
use std::time::Duration;

use rstore::Registration;
use rstore::Registry;
use rstore::Resource;
use rstore::ResourceId;
use rstore::ResourceType;
use rstore::Server;
use rstore::ServerBuilder;
use rstore::Settings;
use rstore::Tenancy;
use rstore::WatchListRequest;
use rstore::WatchListResponse;
use rstore::WatchListStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::Status;

pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
pub const ERROR_TIMEOUT: Duration = Duration::from_secs(2);

pub fn mesh_service() -> ResourceType {
    ResourceType::new("mesh", "v1", "service")
}

pub fn local_tenancy() -> Tenancy {
    Tenancy::new("default", "default", "local")
}

pub fn watch_all(resource_type: ResourceType) -> WatchListRequest {
    WatchListRequest {
        resource_type,
        tenancy: local_tenancy(),
        name_prefix: String::new(),
    }
}

pub fn service_resource(name: &str) -> Resource {
    Resource::new(ResourceId::new(name, mesh_service(), local_tenancy()).with_uid("someUid"))
}

/// A running server with `mesh/v1/service` registered.
pub struct TestServer {
    pub server: Arc<Server>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<rstore::Result<()>>,
}

impl TestServer {
    pub fn start() -> Self {
        let registry = Registry::new();
        registry
            .register(Registration::new(mesh_service()))
            .expect("register mesh/v1/service");

        let shutdown = CancellationToken::new();
        let server = ServerBuilder::init(Settings::default(), shutdown.clone())
            .registry(Arc::new(registry))
            .build()
            .ready()
            .expect("server builds");

        let handle = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        Self {
            server,
            shutdown,
            handle,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.expect("run task joins").expect("run returns Ok");
    }
}

pub type ResourceOrError = Result<WatchListResponse, Status>;

/// Pumps a watch stream into a channel the test can poll with timeouts.
pub fn handle_resource_stream(mut stream: WatchListStream) -> mpsc::Receiver<ResourceOrError> {
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            if tx.send(item).await.is_err() {
                return;
            }
        }
    });
    rx
}

pub async fn must_get_resource(rx: &mut mpsc::Receiver<ResourceOrError>) -> WatchListResponse {
    match timeout(RESPONSE_TIMEOUT, rx.recv()).await {
        Ok(Some(Ok(rsp))) => rsp,
        Ok(Some(Err(status))) => panic!("unexpected stream error: {status}"),
        Ok(None) => panic!("stream ended while waiting for WatchListResponse"),
        Err(_) => panic!("timeout waiting for WatchListResponse"),
    }
}

/// Waits for the stream to end without yielding anything else.
pub async fn must_end(rx: &mut mpsc::Receiver<ResourceOrError>) {
    match timeout(ERROR_TIMEOUT, rx.recv()).await {
        Ok(None) => {}
        Ok(Some(item)) => panic!("expected end of stream, got {item:?}"),
        Err(_) => panic!("timeout waiting for end of stream"),
    }
}

pub async fn must_stay_quiet(rx: &mut mpsc::Receiver<ResourceOrError>) {
    if let Ok(item) = timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("expected no message, got {item:?}");
    }
}
