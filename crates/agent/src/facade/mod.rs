//! External interface façade (C7) — translates RPC calls and controller
//! commands into dispatcher events, returning once a request is validated
//! and accepted rather than waiting for container completion.

pub mod service;

pub mod proto {
    tonic::include_proto!("nodeagent.v1");
}

pub use proto::node_agent_service_server::NodeAgentServiceServer;
pub use service::NodeAgentServiceImpl;
