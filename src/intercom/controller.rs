//! Session controller
//!
//! Owns the session state and at most one [`Pipeline`]. Commands are
//! serialized through one async mutex held for the whole command, so a
//! command that arrives while a pipeline is being joined waits in line
//! behind it (tokio's mutex is fair: arrival order is kept).

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::command::{plan, Command, Step};
use super::state::{IntercomStatus, SessionPhase, SessionState};
use crate::audio::{AudioPlatform, Endpoint, Pipeline, PipelineConfig};
use crate::config::ConfigStore;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

struct Session {
    state: SessionState,
    pipeline: Option<Pipeline>,
    pipelines_built: u64,
    last_error: Option<String>,
}

impl Session {
    fn pipeline_id(&self) -> Option<Uuid> {
        self.pipeline.as_ref().map(Pipeline::id)
    }
}

/// Intercom session controller
///
/// Every public command runs to completion under the session lock. A
/// command future that is dropped half way leaves any pipeline it was
/// building to tear itself down unjoined, so callers should not put
/// timeouts around commands.
pub struct IntercomController {
    platform: Arc<dyn AudioPlatform>,
    config: ConfigStore,
    events: Arc<EventBus>,
    session: Mutex<Session>,
    status_tx: watch::Sender<IntercomStatus>,
}

impl IntercomController {
    /// Create a stopped controller using the configured default direction
    pub fn new(platform: Arc<dyn AudioPlatform>, config: ConfigStore, events: Arc<EventBus>) -> Self {
        let state = SessionState::new(config.get().routing.default_direction);
        let (status_tx, _) = watch::channel(IntercomStatus::new(state));

        info!(
            "Intercom controller ready on {} platform, {} talks first",
            platform.name(),
            state.direction
        );

        Self {
            platform,
            config,
            events,
            session: Mutex::new(Session {
                state,
                pipeline: None,
                pipelines_built: 0,
                last_error: None,
            }),
            status_tx,
        }
    }

    /// Run one command and return the resulting state
    ///
    /// Permission and device failures are returned here and also published
    /// as one notification event; the session is left in the state the
    /// transition table prescribes for a failed build.
    pub async fn execute(&self, command: Command) -> Result<SessionState> {
        let mut session = self.session.lock().await;
        let before = session.state;

        let steps = plan(&before, command);
        if steps.is_empty() {
            debug!("{} ignored while {}", command, before.phase());
            return Ok(before);
        }
        info!("{} requested while {}", command, before.phase());

        let mut outcome = Ok(());
        for step in steps {
            if let Err(e) = self.apply(&mut session, step).await {
                outcome = Err(e);
                break;
            }
        }

        self.publish_status(&session, session.state.phase());
        if session.state != before {
            let state = session.state;
            self.events.publish(SystemEvent::StateChanged {
                running: state.running,
                direction: state.direction,
                mute: state.mute,
                phase: state.phase(),
            });
        }

        match outcome {
            Ok(()) => {
                info!(
                    "{} done: {} ({} talks)",
                    command,
                    session.state.phase(),
                    session.state.direction
                );
                Ok(session.state)
            }
            Err(e) => {
                self.notify_failure(command, &e);
                Err(e)
            }
        }
    }

    pub async fn start(&self) -> Result<SessionState> {
        self.execute(Command::Start).await
    }

    pub async fn switch_direction(&self) -> Result<SessionState> {
        self.execute(Command::SwitchDirection).await
    }

    pub async fn mute(&self) -> Result<SessionState> {
        self.execute(Command::Mute).await
    }

    pub async fn unmute(&self) -> Result<SessionState> {
        self.execute(Command::Unmute).await
    }

    pub async fn toggle_mute(&self) -> Result<SessionState> {
        self.execute(Command::ToggleMute).await
    }

    pub async fn stop(&self) -> Result<SessionState> {
        self.execute(Command::Stop).await
    }

    /// Stop the session before the process exits
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(_) => info!("Intercom shut down"),
            Err(e) => warn!("Intercom shutdown failed: {}", e),
        }
    }

    /// Last published state; never waits for a command in progress
    pub fn state(&self) -> SessionState {
        self.status_tx.borrow().state
    }

    pub fn status(&self) -> IntercomStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch status changes, including the transient starting/stopping phases
    pub fn subscribe_status(&self) -> watch::Receiver<IntercomStatus> {
        self.status_tx.subscribe()
    }

    /// Endpoints currently visible to the platform
    pub async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let platform = self.platform.clone();
        tokio::task::spawn_blocking(move || platform.list_endpoints())
            .await
            .map_err(|e| AppError::Internal(format!("endpoint listing panicked: {}", e)))
    }

    async fn apply(&self, session: &mut Session, step: Step) -> Result<()> {
        match step {
            Step::StopPipeline => {
                // Observers see the running pipeline while it drains
                if session.pipeline.is_some() {
                    self.publish_status(session, SessionPhase::Stopping);
                }
                if let Some(pipeline) = session.pipeline.take() {
                    debug!("Stopping {} pipeline {}", pipeline.direction(), pipeline.id());
                    pipeline.stop().await;
                }
                session.state.running = false;
            }
            Step::FlipDirection => {
                session.state.direction = session.state.direction.flipped();
                debug!("Direction now {}", session.state.direction);
            }
            Step::SetMute(mute) => session.state.mute = mute,
            Step::StartPipeline => {
                self.publish_status(session, SessionPhase::Starting);

                let config = PipelineConfig::from_app(&self.config.get());
                let started = Pipeline::start(
                    self.platform.clone(),
                    session.state.direction,
                    config,
                    self.events.clone(),
                )
                .await;

                match started {
                    Ok(pipeline) => {
                        session.pipeline = Some(pipeline);
                        session.state.running = true;
                        session.pipelines_built += 1;
                        session.last_error = None;
                    }
                    Err(e) => {
                        session.last_error = Some(e.to_string());
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    fn publish_status(&self, session: &Session, phase: SessionPhase) {
        let state = session.state;
        let pipeline_id = session.pipeline_id();
        let pipelines_built = session.pipelines_built;
        let last_error = session.last_error.clone();

        self.status_tx.send_modify(|status| {
            status.state = state;
            status.phase = phase;
            status.speaker = state.direction.speaker();
            status.pipeline_id = pipeline_id;
            status.pipelines_built = pipelines_built;
            status.last_error = last_error;
            status.updated_at = chrono::Utc::now();
        });
    }

    fn notify_failure(&self, command: Command, err: &AppError) {
        match err {
            AppError::PermissionDenied(reason) => {
                warn!("{} refused: {}", command, reason);
                self.events.publish(SystemEvent::PermissionDenied {
                    command: command.to_string(),
                    reason: reason.clone(),
                });
            }
            AppError::DeviceUnavailable { device, reason } => {
                warn!("{} failed: {}", command, err);
                self.events.publish(SystemEvent::DeviceUnavailable {
                    command: command.to_string(),
                    device: device.clone(),
                    reason: reason.clone(),
                });
            }
            other => error!("{} failed: {}", command, other),
        }
    }
}
