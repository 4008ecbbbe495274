//! Engine wiring
//!
//! Builds the shared event bus, the tool registry with builtins, and the
//! three dispatch components on top of them.

pub mod config;
pub mod loader;

use anyhow::{Context, Result};
use conduit_core::{CommunicationManager, EventBus, JobOrchestrator, Orchestrator};
use conduit_tools::{register_builtins, ToolRegistry};
use std::sync::Arc;
use tracing::info;

pub use self::config::{AppConfig, LogFormat};
pub use self::loader::load_config;

/// Running components sharing one event bus
pub struct Engine {
    pub event_bus: EventBus,
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: JobOrchestrator,
    pub communication: CommunicationManager,
}

impl Engine {
    /// Build every component from the application config.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(config: &AppConfig) -> Result<Self> {
        let event_bus = EventBus::new((&config.event_bus).into());

        let registry = Arc::new(ToolRegistry::new());
        register_builtins(&registry).context("Failed to register builtin tools")?;

        let orchestrator = Arc::new(
            Orchestrator::new(registry, (&config.orchestrator).into())
                .with_event_bus(event_bus.clone()),
        );
        let jobs = JobOrchestrator::with_event_bus((&config.jobs).into(), event_bus.clone());
        let communication = CommunicationManager::new(
            orchestrator.clone(),
            event_bus.clone(),
            (&config.communication).into(),
        );

        info!(tools = orchestrator.list().len(), "Engine ready");
        Ok(Self {
            event_bus,
            orchestrator,
            jobs,
            communication,
        })
    }

    /// Stop intake everywhere, drain the job workers, then close the bus
    pub async fn shutdown(&self) {
        self.communication.close();
        self.orchestrator.close();
        self.jobs.stop().await;
        self.event_bus.close().await;
        info!("Engine stopped");
    }
}
