use super::orchestrator::Prepared;
use super::types::COMPONENTS;
use super::{BeltgateOrchestrator, ComponentState};
use crate::capture::CaptureCoordinator;
use crate::control::{ControlServer, ControlState};
use crate::decision::DecisionEngine;
use crate::error::{BeltgateError, Result};
use crate::inference::{ClassLabels, InferenceBridge};
use crate::queue::QueueStatus;
use crate::report::ScanReporter;
use crate::telemetry::{LogForwarder, StatusPublisher};
use std::sync::Arc;
use tracing::{error, info};

impl BeltgateOrchestrator {
    /// Build every component and bind the control socket
    ///
    /// Nothing runs yet; a bind failure is returned as a fatal error.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Beltgate components");

        {
            let mut states = self.component_states.lock().await;
            for component in COMPONENTS {
                states.insert(component.to_string(), ComponentState::Stopped);
            }
        }

        let actuator = self.actuator();
        let backend = self
            .backend
            .take()
            .ok_or_else(|| BeltgateError::system("System already initialized"))?;

        let decision = DecisionEngine::new(
            &self.config.decision,
            Arc::clone(&self.state),
            Arc::clone(&self.outputs),
            Arc::clone(&self.reports),
            Arc::clone(&actuator),
        );

        let queues = vec![
            self.frames.clone() as Arc<dyn QueueStatus>,
            self.outputs.clone(),
            self.reports.clone(),
            self.telemetry.clone(),
        ];
        let control_state = ControlState::new(
            Arc::clone(&self.state),
            actuator,
            decision.stats(),
            queues,
        );
        let control = ControlServer::bind(&self.config.control, control_state)
            .await
            .map_err(|e| {
                error!("Failed to bind control API: {}", e);
                e
            })?;

        let inference = InferenceBridge::new(
            backend,
            ClassLabels::new(self.config.inference.labels.clone()),
            Arc::clone(&self.frames),
            Arc::clone(&self.outputs),
        );

        self.prepared = Some(Prepared {
            control,
            log_forwarder: LogForwarder::new(&self.config.reporting, Arc::clone(&self.telemetry)),
            status_publisher: StatusPublisher::new(&self.config.reporting, Arc::clone(&self.state)),
            reporter: ScanReporter::new(&self.config.reporting, Arc::clone(&self.reports)),
            decision,
            inference,
        });

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start components in dependency order, capture last
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Beltgate pipeline");

        let prepared = self
            .prepared
            .take()
            .ok_or_else(|| BeltgateError::system("System not initialized"))?;

        self.set_component_state("telemetry", ComponentState::Starting)
            .await;
        self.running.log_forwarder =
            Some(self.spawn_checked("telemetry", prepared.log_forwarder.spawn()).await?);
        self.running.status_publisher =
            Some(self.spawn_checked("telemetry", prepared.status_publisher.spawn()).await?);
        self.set_component_state("telemetry", ComponentState::Running)
            .await;

        self.set_component_state("control", ComponentState::Starting)
            .await;
        let token = self.cancellation_token.child_token();
        self.running.control = Some(tokio::spawn(prepared.control.serve(token)));
        self.set_component_state("control", ComponentState::Running)
            .await;
        info!(
            "Control API started on {}:{}",
            self.config.control.ip, self.config.control.port
        );

        self.set_component_state("reporter", ComponentState::Starting)
            .await;
        self.running.reporter =
            Some(self.spawn_checked("reporter", prepared.reporter.spawn()).await?);
        self.set_component_state("reporter", ComponentState::Running)
            .await;

        self.set_component_state("decision", ComponentState::Starting)
            .await;
        self.running.decision =
            Some(self.spawn_checked("decision", prepared.decision.spawn()).await?);
        self.set_component_state("decision", ComponentState::Running)
            .await;

        self.set_component_state("inference", ComponentState::Starting)
            .await;
        self.running.inference =
            Some(self.spawn_checked("inference", prepared.inference.spawn()).await?);
        self.set_component_state("inference", ComponentState::Running)
            .await;

        self.set_component_state("capture", ComponentState::Starting)
            .await;
        let mut coordinator = CaptureCoordinator::new(
            Arc::clone(&self.config),
            Arc::clone(&self.state),
            Arc::clone(&self.opener),
            Arc::clone(&self.frames),
            Arc::clone(&self.outputs),
        );
        if let Some(monitor) = &self.monitor {
            coordinator = coordinator.with_monitor(Arc::clone(monitor));
        }
        let capture = std::thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || coordinator.run());
        self.running.capture = Some(self.spawn_checked("capture", capture).await?);
        self.set_component_state("capture", ComponentState::Running)
            .await;

        info!("Beltgate pipeline started successfully");
        Ok(())
    }

    async fn spawn_checked<T>(&self, component: &str, spawned: std::io::Result<T>) -> Result<T> {
        match spawned {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Failed to start {}: {}", component, e);
                Err(BeltgateError::component(component.to_string(), e.to_string()))
            }
        }
    }
}
