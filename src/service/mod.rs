//! Resource service
//!
//! Request/response surface over a [`Backend`]. Every call checks the type
//! registry first, so requests naming an unknown type fail with
//! `INVALID_ARGUMENT` before the backend is touched.

mod status;
mod watch_handler;

pub use watch_handler::WatchStreamHandler;


use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::debug;
use tracing::info;

use crate::Backend;
use crate::ChangeEvent;
use crate::Operation;
use crate::Registry;
use crate::Resource;
use crate::ResourceId;
use crate::ResourceType;
use crate::StoreError;
use crate::Tenancy;
use crate::WatchConfig;
use crate::WatchFilter;

/// Write carrying its expected version in `resource.version`. An empty version
/// creates.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub resource: Resource,
}

#[derive(Debug, Clone)]
pub struct WriteResponse {
    pub resource: Resource,
}

#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub id: ResourceId,
}

#[derive(Debug, Clone)]
pub struct ReadResponse {
    pub resource: Resource,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub id: ResourceId,
    pub version: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteResponse {}

#[derive(Debug, Clone)]
pub struct ListRequest {
    pub resource_type: ResourceType,
    pub tenancy: Tenancy,
    pub name_prefix: String,
}

#[derive(Debug, Clone)]
pub struct ListResponse {
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone)]
pub struct WatchListRequest {
    pub resource_type: ResourceType,
    pub tenancy: Tenancy,
    pub name_prefix: String,
}

impl From<WatchListRequest> for WatchFilter {
    fn from(req: WatchListRequest) -> Self {
        WatchFilter::new(req.resource_type, req.tenancy, req.name_prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchListResponse {
    pub operation: Operation,
    pub resource: Resource,
}

impl From<ChangeEvent> for WatchListResponse {
    fn from(event: ChangeEvent) -> Self {
        Self {
            operation: event.operation,
            resource: event.resource,
        }
    }
}

pub type WatchListStream = ReceiverStream<Result<WatchListResponse, Status>>;

pub struct ResourceService<B: Backend> {
    registry: Arc<Registry>,
    backend: Arc<B>,
    config: WatchConfig,

    /// Parent of every watch stream's cancellation token
    shutdown: CancellationToken,
}

impl<B: Backend> ResourceService<B> {
    pub fn new(
        registry: Arc<Registry>,
        backend: Arc<B>,
        config: WatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
            shutdown,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn check_type(
        &self,
        resource_type: &ResourceType,
    ) -> Result<(), Status> {
        self.registry.require(resource_type).map(|_| ()).map_err(Status::from)
    }

    pub async fn write(
        &self,
        request: Request<WriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        let WriteRequest { resource } = request.into_inner();
        self.check_type(&resource.id.resource_type)?;

        let expected_version = resource.version.clone();
        let resource = self.backend.write_cas(resource, &expected_version)?;
        Ok(Response::new(WriteResponse { resource }))
    }

    pub async fn read(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<ReadResponse>, Status> {
        let ReadRequest { id } = request.into_inner();
        self.check_type(&id.resource_type)?;

        match self.backend.read(&id)? {
            Some(resource) => Ok(Response::new(ReadResponse { resource })),
            None => Err(StoreError::NotFound(id.key().to_string()).into()),
        }
    }

    pub async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let DeleteRequest { id, version } = request.into_inner();
        self.check_type(&id.resource_type)?;

        self.backend.delete_cas(&id, &version)?;
        Ok(Response::new(DeleteResponse {}))
    }

    pub async fn list(
        &self,
        request: Request<ListRequest>,
    ) -> Result<Response<ListResponse>, Status> {
        let req = request.into_inner();
        self.check_type(&req.resource_type)?;

        let filter = WatchFilter::new(req.resource_type, req.tenancy, req.name_prefix);
        let resources = self.backend.list(&filter)?;
        Ok(Response::new(ListResponse { resources }))
    }

    /// Opens a watch stream.
    ///
    /// Resources that already match are sent first as upserts, then every
    /// later change in commit order. The stream ends when the client drops
    /// it, the service shuts down, or the subscription is closed by the
    /// backend.
    pub async fn watch_list(
        &self,
        request: Request<WatchListRequest>,
    ) -> Result<Response<WatchListStream>, Status> {
        let filter: WatchFilter = request.into_inner().into();
        self.check_type(&filter.resource_type)?;

        let subscription = self.backend.watch_list(filter, self.shutdown.child_token()).await?;
        info!(
            subscription_id = subscription.id(),
            resource_type = %subscription.filter().resource_type,
            tenancy = %subscription.filter().tenancy,
            name_prefix = %subscription.filter().name_prefix,
            "Registered watch"
        );

        let (response_sender, response_receiver) = mpsc::channel(self.config.response_buffer_size.max(1));
        let handler = WatchStreamHandler::new(subscription);
        tokio::spawn(handler.run(response_sender));

        debug!("Watch stream handed to client");
        Ok(Response::new(ReceiverStream::new(response_receiver)))
    }
}
