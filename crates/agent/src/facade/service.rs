use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::warn;

use crate::context::Context;
use crate::container::ContainerEntity;
use crate::dispatcher::{ApplicationEvent, ContainerEvent, Dispatcher, Event};
use crate::error::AgentError;
use crate::ids::{ApplicationId, ContainerId, LaunchContext, LocalResourceRequest, Visibility};

use super::proto::{
    node_agent_service_server::NodeAgentService, CleanupContainerRequest, CleanupContainerResponse,
    GetContainerStatusRequest, GetContainerStatusResponse, StartContainerRequest, StartContainerResponse,
    StopContainerRequest, StopContainerResponse,
};

pub struct NodeAgentServiceImpl {
    context: Arc<Context>,
    dispatcher: Arc<Dispatcher>,
}

impl NodeAgentServiceImpl {
    pub fn new(context: Arc<Context>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { context, dispatcher }
    }
}

fn container_id_of(ts: u64, app_id: u32, sequence: u32) -> ContainerId {
    ContainerId { app: ApplicationId { cluster_timestamp: ts, id: app_id }, sequence }
}

fn visibility_from_proto(v: i32) -> Visibility {
    match super::proto::Visibility::try_from(v).unwrap_or(super::proto::Visibility::Public) {
        super::proto::Visibility::Private => Visibility::Private,
        super::proto::Visibility::Application => Visibility::Application,
        _ => Visibility::Public,
    }
}

fn launch_context_from_proto(proto: super::proto::LaunchContext) -> LaunchContext {
    LaunchContext {
        command: proto.command,
        environment: proto.environment,
        resources: proto
            .resources
            .into_iter()
            .map(|r| LocalResourceRequest {
                uri: r.uri,
                size: r.size,
                timestamp: r.timestamp,
                visibility: visibility_from_proto(r.visibility),
            })
            .collect(),
    }
}

#[tonic::async_trait]
impl NodeAgentService for NodeAgentServiceImpl {
    async fn start_container(
        &self,
        request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        let req = request.into_inner();
        let container_id = container_id_of(req.app_cluster_timestamp, req.app_id, req.container_sequence);
        let launch_ctx = launch_context_from_proto(req.launch_context.unwrap_or_default());

        if launch_ctx.command.is_empty() {
            return Err(AgentError::Validation("launch_context.command must not be empty".to_string()).to_status());
        }

        let entity = ContainerEntity::new(container_id, launch_ctx);

        if !self.context.insert_container_if_absent(container_id, entity) {
            return Err(AgentError::ContainerAlreadyExists(container_id.to_string()).to_status());
        }

        self.dispatcher
            .post(Event::Application(
                container_id.app,
                ApplicationEvent::InitApplication { container: container_id, user: req.user },
            ))
            .await;

        Ok(Response::new(StartContainerResponse {}))
    }

    async fn stop_container(
        &self,
        request: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        let req = request.into_inner();
        let container_id = container_id_of(req.app_cluster_timestamp, req.app_id, req.container_sequence);

        if self.context.get_container(&container_id).is_none() {
            warn!(%container_id, "StopContainer for unknown container; returning benign empty response");
            return Ok(Response::new(StopContainerResponse {}));
        }

        self.dispatcher.post(Event::Container(container_id, ContainerEvent::Kill)).await;
        Ok(Response::new(StopContainerResponse {}))
    }

    async fn get_container_status(
        &self,
        request: Request<GetContainerStatusRequest>,
    ) -> Result<Response<GetContainerStatusResponse>, Status> {
        let req = request.into_inner();
        let container_id = container_id_of(req.app_cluster_timestamp, req.app_id, req.container_sequence);

        let entity = self
            .context
            .get_container(&container_id)
            .ok_or_else(|| AgentError::ContainerNotFound(container_id.to_string()).to_status())?;

        let container = entity.lock().await;
        Ok(Response::new(GetContainerStatusResponse {
            state: format!("{:?}", container.state),
            exit_code: container.exit_status,
            diagnostics: container.diagnostics.join("; "),
        }))
    }

    async fn cleanup_container(
        &self,
        _request: Request<CleanupContainerRequest>,
    ) -> Result<Response<CleanupContainerResponse>, Status> {
        Ok(Response::new(CleanupContainerResponse {}))
    }
}
