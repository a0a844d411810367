use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent::application::ApplicationFsmHandler;
use agent::collaborators::fake::{FakeController, FakeFetcher, FakeKiller, FakeLauncher};
use agent::conf::AgentConfig;
use agent::container::ContainerFsmHandler;
use agent::context::Context;
use agent::controller;
use agent::dispatcher::{Dispatcher, EntityKind};
use agent::facade::{NodeAgentServiceImpl, NodeAgentServiceServer};
use agent::resource::coordinator::LocalizationCoordinator;
use agent::resource::ResourceFsmHandler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    let config = AgentConfig::load()?;
    config.validate().map_err(|e| format!("invalid configuration: {e}"))?;
    info!(bind_address = %config.bind_address, "starting node agent");

    let context = Context::new();
    let dispatcher = Dispatcher::new();

    // Production wiring for the downloader, launcher, killer and
    // controller-notification collaborators lives outside this crate; the
    // deterministic fakes below stand in for them here.
    let fetcher = Arc::new(FakeFetcher::new());
    let launcher = Arc::new(FakeLauncher::new());
    let killer = Arc::new(FakeKiller::new());
    let controller_notifier = Arc::new(FakeController::new());

    let coordinator = LocalizationCoordinator::new(fetcher);

    dispatcher.register(EntityKind::Application, Arc::new(ApplicationFsmHandler { context: context.clone() }));
    dispatcher.register(
        EntityKind::Container,
        Arc::new(ContainerFsmHandler {
            context: context.clone(),
            launcher,
            killer,
            controller: controller_notifier,
            kill_grace: Duration::from_millis(config.kill_grace_millis),
            kill_force: Duration::from_millis(config.kill_force_millis),
        }),
    );
    dispatcher.register(EntityKind::Resource, Arc::new(ResourceFsmHandler { coordinator: coordinator.clone() }));
    dispatcher.register(EntityKind::Coordinator, Arc::new(CoordinatorHandler(coordinator)));

    let (controller_tx, controller_rx) = controller::channel();
    tokio::spawn(controller::run(dispatcher.clone(), controller_rx));
    let _controller_tx = controller_tx; // kept alive for the lifetime of the process; the heartbeat transport feeds this externally

    spawn_eviction_tick(dispatcher.clone(), config.cache_bytes_target);

    let addr = config.bind_address.parse()?;
    let service = NodeAgentServiceImpl::new(context, dispatcher);

    info!(%addr, "node agent RPC listening");
    Server::builder()
        .add_service(NodeAgentServiceServer::new(service))
        .serve_with_shutdown(addr, async {
            signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

/// Periodically nudges the coordinator to sweep unreferenced cache
/// entries. Eviction is advisory (§4.3) — this is scheduling, not policy.
fn spawn_eviction_tick(dispatcher: Arc<Dispatcher>, target_bytes: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            dispatcher
                .post(agent::dispatcher::Event::Coordinator(agent::dispatcher::CoordinatorEvent::Evict { target_bytes }))
                .await;
        }
    });
}

struct CoordinatorHandler(Arc<LocalizationCoordinator>);

#[async_trait::async_trait]
impl agent::dispatcher::EventHandler for CoordinatorHandler {
    async fn handle(&self, dispatcher: &Arc<Dispatcher>, event: agent::dispatcher::Event) {
        if let agent::dispatcher::Event::Coordinator(coordinator_event) = event {
            self.0.apply_coordinator_event(dispatcher, coordinator_event).await;
        }
    }
}
