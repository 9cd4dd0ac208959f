//! Agent lifecycle state machine.
//!
//! ```text
//!   Unrecognized ──register──▶ Recognized ◀─────────────────────────────────┐
//!                                │   │                                        │
//!              prepare_for_backup│   │prepare_for_restore                     │
//!                                ▼   ▼                                        │
//!     PreparingBackup ─execute─▶ ExecutingBackup ─post action─▶ PostActionBackup ─reset─┤
//!     PreparingRestore ─execute─▶ ExecutingRestore ─post action─▶ PostActionRestore     │
//!            │ (any backup/restore state)                                     │
//!            └──cancel──▶ CancelingAction ──stage complete──────────────────────┘
//! ```
//!
//! States are immutable values. Every operation returns a [`StateChange`]
//! holding the next state and, optionally, the effect to run once that state
//! is committed. Operations that are not legal for a state fail with
//! [`OrchestratorError::IllegalTransition`] and produce no effect.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent::api_version::ApiVersion;
use crate::agent::effect::{Effect, StageMetrics, StateChange};
use crate::agent::registration::{Registration, SoftwareVersion};
use crate::error::{OrchestratorError, Result};
use crate::job::{Job, JobHandle, RestoreJob};
use crate::protocol::{ActionKind, AgentControl};

/// An agent taking part in one stage of a backup.
#[derive(Clone)]
pub struct BackupParticipation {
    pub registration: Arc<Registration>,
    pub job: Arc<dyn Job>,
    pub stage_started: DateTime<Utc>,
}

/// An agent taking part in one stage of a restore.
#[derive(Clone)]
pub struct RestoreParticipation {
    pub registration: Arc<Registration>,
    pub job: Arc<dyn RestoreJob>,
    pub stage_started: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct Cancellation {
    pub registration: Arc<Registration>,
    pub job: JobHandle,
}

#[derive(Clone)]
pub enum AgentState {
    Unrecognized,
    Recognized(Arc<Registration>),
    PreparingBackup(BackupParticipation),
    ExecutingBackup(BackupParticipation),
    PostActionBackup(BackupParticipation),
    PreparingRestore(RestoreParticipation),
    ExecutingRestore(RestoreParticipation),
    PostActionRestore(RestoreParticipation),
    CancelingAction(Cancellation),
}

impl BackupParticipation {
    fn new(registration: Arc<Registration>, job: Arc<dyn Job>) -> Self {
        Self { registration, job, stage_started: Utc::now() }
    }

    fn next_stage(&self) -> Self {
        Self::new(self.registration.clone(), self.job.clone())
    }
}

impl RestoreParticipation {
    fn new(registration: Arc<Registration>, job: Arc<dyn RestoreJob>) -> Self {
        Self { registration, job, stage_started: Utc::now() }
    }

    fn next_stage(&self) -> Self {
        Self::new(self.registration.clone(), self.job.clone())
    }
}

impl AgentState {
    pub fn name(&self) -> &'static str {
        match self {
            AgentState::Unrecognized => "Unrecognized",
            AgentState::Recognized(_) => "Recognized",
            AgentState::PreparingBackup(_) => "PreparingBackup",
            AgentState::ExecutingBackup(_) => "ExecutingBackup",
            AgentState::PostActionBackup(_) => "PostActionBackup",
            AgentState::PreparingRestore(_) => "PreparingRestore",
            AgentState::ExecutingRestore(_) => "ExecutingRestore",
            AgentState::PostActionRestore(_) => "PostActionRestore",
            AgentState::CancelingAction(_) => "CancelingAction",
        }
    }

    pub fn registration(&self) -> Option<&Arc<Registration>> {
        match self {
            AgentState::Unrecognized => None,
            AgentState::Recognized(registration) => Some(registration),
            AgentState::PreparingBackup(p) | AgentState::ExecutingBackup(p) | AgentState::PostActionBackup(p) => {
                Some(&p.registration)
            }
            AgentState::PreparingRestore(p)
            | AgentState::ExecutingRestore(p)
            | AgentState::PostActionRestore(p) => Some(&p.registration),
            AgentState::CancelingAction(c) => Some(&c.registration),
        }
    }

    /// The job this agent currently reports to, if any.
    pub fn job(&self) -> Option<JobHandle> {
        match self {
            AgentState::Unrecognized | AgentState::Recognized(_) => None,
            AgentState::PreparingBackup(p) | AgentState::ExecutingBackup(p) | AgentState::PostActionBackup(p) => {
                Some(JobHandle::Backup(p.job.clone()))
            }
            AgentState::PreparingRestore(p)
            | AgentState::ExecutingRestore(p)
            | AgentState::PostActionRestore(p) => Some(JobHandle::Restore(p.job.clone())),
            AgentState::CancelingAction(c) => Some(c.job.clone()),
        }
    }

    fn require_registration(&self, operation: &'static str) -> Result<&Arc<Registration>> {
        self.registration().ok_or_else(|| {
            tracing::error!("Trying to {operation} from unrecognized agent");
            self.illegal(operation)
        })
    }

    pub fn agent_id(&self) -> Result<&str> {
        Ok(&self.require_registration("get agent id")?.agent_id)
    }

    pub fn api_version(&self) -> Result<&ApiVersion> {
        Ok(&self.require_registration("get API version")?.api_version)
    }

    pub fn scope(&self) -> Result<&str> {
        Ok(&self.require_registration("get scope")?.scope)
    }

    pub fn software_version(&self) -> Result<SoftwareVersion> {
        Ok(self.require_registration("get software version")?.software_version())
    }

    fn illegal(&self, operation: &'static str) -> OrchestratorError {
        OrchestratorError::IllegalTransition {
            agent_id: self.registration().map(|r| r.agent_id.clone()),
            state: self.name(),
            operation,
        }
    }

    fn unchanged(&self) -> StateChange {
        StateChange::to(self.clone())
    }

    pub fn process_message(&self, message: &AgentControl) -> Result<StateChange> {
        match self {
            AgentState::Unrecognized => match &message.register {
                Some(register) if message.is_registration() => {
                    tracing::info!(agent_id = %register.agent_id, api_version = %register.api_version, scope = %register.scope, "Registering agent");
                    let registration = Registration::validate(register)?;
                    Ok(StateChange::with_effect(
                        AgentState::Recognized(Arc::new(registration)),
                        Effect::AddAgentToRepository,
                    ))
                }
                _ => {
                    tracing::info!("Unexpected message {:?} received for unrecognized agent", message.agent_message_type);
                    Ok(self.unchanged())
                }
            },
            AgentState::Recognized(registration) => {
                tracing::info!(
                    agent_id = %registration.agent_id,
                    "Ignoring message {:?}/{:?}: not expected while the agent is in state <{}>",
                    message.action,
                    message.agent_message_type,
                    self.name()
                );
                Ok(self.unchanged())
            }
            AgentState::PreparingBackup(p) | AgentState::ExecutingBackup(p) | AgentState::PostActionBackup(p) => {
                let Some(stage_complete) = message.stage_complete_for(ActionKind::Backup) else {
                    return Ok(self.unchanged());
                };
                let agent_id = &p.registration.agent_id;
                tracing::info!(agent_id = %agent_id, success = stage_complete.success, "Received backup stage complete in state <{}>", self.name());
                let job = JobHandle::Backup(p.job.clone());
                let metrics = StageMetrics::capture(agent_id, &job, p.stage_started, stage_complete.success);
                Ok(StateChange::with_effect(
                    self.clone(),
                    Effect::UpdateProgress {
                        agent_id: agent_id.clone(),
                        job,
                        stage_complete: stage_complete.clone(),
                        metrics: Some(metrics),
                    },
                ))
            }
            AgentState::PreparingRestore(p)
            | AgentState::ExecutingRestore(p)
            | AgentState::PostActionRestore(p) => {
                let Some(stage_complete) = message.stage_complete_for(ActionKind::Restore) else {
                    return Ok(self.unchanged());
                };
                let agent_id = &p.registration.agent_id;
                tracing::info!(agent_id = %agent_id, success = stage_complete.success, "Received restore stage complete in state <{}>", self.name());
                let job = JobHandle::Restore(p.job.clone());
                let metrics = StageMetrics::capture(agent_id, &job, p.stage_started, stage_complete.success);
                Ok(StateChange::with_effect(
                    self.clone(),
                    Effect::UpdateProgress {
                        agent_id: agent_id.clone(),
                        job,
                        stage_complete: stage_complete.clone(),
                        metrics: Some(metrics),
                    },
                ))
            }
            AgentState::CancelingAction(c) => {
                let Some(stage_complete) = message.any_stage_complete() else {
                    return Ok(self.unchanged());
                };
                tracing::info!(agent_id = %c.registration.agent_id, "Agent finished cancelling {}", c.job.kind());
                Ok(StateChange::with_effect(
                    AgentState::Recognized(c.registration.clone()),
                    Effect::UpdateProgress {
                        agent_id: c.registration.agent_id.clone(),
                        job: c.job.clone(),
                        stage_complete: stage_complete.clone(),
                        metrics: None,
                    },
                ))
            }
        }
    }

    pub fn prepare_for_backup(&self, job: Arc<dyn Job>) -> Result<StateChange> {
        match self {
            AgentState::Recognized(registration) => {
                tracing::info!(agent_id = %registration.agent_id, "Triggering backup preparation");
                let effect = Effect::SendPrepareForBackup {
                    backup_name: job.backup_name(),
                    backup_manager_id: job.agent_visible_backup_manager_id(),
                };
                Ok(StateChange::with_effect(
                    AgentState::PreparingBackup(BackupParticipation::new(registration.clone(), job)),
                    effect,
                ))
            }
            _ => Err(self.illegal("prepare for backup")),
        }
    }

    pub fn prepare_for_restore(&self, job: Arc<dyn RestoreJob>) -> Result<StateChange> {
        match self {
            AgentState::Recognized(registration) => {
                tracing::info!(agent_id = %registration.agent_id, "Triggering restore preparation");
                let effect = Effect::SendPrepareForRestore {
                    agent_id: registration.agent_id.clone(),
                    job: job.clone(),
                    send_fragment_list: registration.api_version.supports_fragment_list(),
                };
                Ok(StateChange::with_effect(
                    AgentState::PreparingRestore(RestoreParticipation::new(registration.clone(), job)),
                    effect,
                ))
            }
            _ => Err(self.illegal("prepare for restore")),
        }
    }

    pub fn execute_backup(&self) -> Result<StateChange> {
        match self {
            AgentState::PreparingBackup(p) => {
                let version = &p.registration.api_version;
                if !version.supports_backup_execution() {
                    return Err(OrchestratorError::UnsupportedApiVersion {
                        agent_id: p.registration.agent_id.clone(),
                        version: version.clone(),
                        operation: "execute backup",
                    });
                }
                tracing::info!(agent_id = %p.registration.agent_id, "Triggering backup execution");
                Ok(StateChange::with_effect(
                    AgentState::ExecutingBackup(p.next_stage()),
                    Effect::SendExecuteBackup,
                ))
            }
            _ => Err(self.illegal("execute backup")),
        }
    }

    pub fn execute_backup_post_action(&self) -> Result<StateChange> {
        match self {
            AgentState::ExecutingBackup(p) => {
                tracing::info!(agent_id = %p.registration.agent_id, "Triggering backup post action");
                Ok(StateChange::with_effect(
                    AgentState::PostActionBackup(p.next_stage()),
                    Effect::SendBackupPostAction,
                ))
            }
            _ => Err(self.illegal("execute backup post action")),
        }
    }

    pub fn execute_restore(&self) -> Result<StateChange> {
        match self {
            AgentState::PreparingRestore(p) => {
                tracing::info!(agent_id = %p.registration.agent_id, "Triggering restore execution");
                Ok(StateChange::with_effect(
                    AgentState::ExecutingRestore(p.next_stage()),
                    Effect::SendExecuteRestore,
                ))
            }
            _ => Err(self.illegal("execute restore")),
        }
    }

    pub fn execute_restore_post_action(&self) -> Result<StateChange> {
        match self {
            AgentState::ExecutingRestore(p) => {
                tracing::info!(agent_id = %p.registration.agent_id, "Triggering restore post action");
                Ok(StateChange::with_effect(
                    AgentState::PostActionRestore(p.next_stage()),
                    Effect::SendRestorePostAction,
                ))
            }
            _ => Err(self.illegal("execute restore post action")),
        }
    }

    pub fn cancel_action(&self) -> Result<StateChange> {
        match self {
            AgentState::Unrecognized => Err(self.illegal("cancel action")),
            AgentState::Recognized(registration) => Ok(StateChange::to(AgentState::Recognized(registration.clone()))),
            AgentState::PreparingBackup(p) | AgentState::ExecutingBackup(p) | AgentState::PostActionBackup(p) => {
                tracing::info!(agent_id = %p.registration.agent_id, "Cancelling backup in state <{}>", self.name());
                Ok(StateChange::with_effect(
                    AgentState::CancelingAction(Cancellation {
                        registration: p.registration.clone(),
                        job: JobHandle::Backup(p.job.clone()),
                    }),
                    Effect::SendCancel(ActionKind::Backup),
                ))
            }
            AgentState::PreparingRestore(p)
            | AgentState::ExecutingRestore(p)
            | AgentState::PostActionRestore(p) => {
                tracing::info!(agent_id = %p.registration.agent_id, "Cancelling restore in state <{}>", self.name());
                Ok(StateChange::with_effect(
                    AgentState::CancelingAction(Cancellation {
                        registration: p.registration.clone(),
                        job: JobHandle::Restore(p.job.clone()),
                    }),
                    Effect::SendCancel(ActionKind::Restore),
                ))
            }
            // Already cancelling: the agent has the command, wait for its stage complete.
            AgentState::CancelingAction(_) => Ok(self.unchanged()),
        }
    }

    pub fn reset_state(&self) -> Result<StateChange> {
        match self {
            AgentState::Recognized(registration) | AgentState::PostActionBackup(BackupParticipation { registration, .. }) => {
                Ok(StateChange::to(AgentState::Recognized(registration.clone())))
            }
            AgentState::PreparingBackup(p) if p.registration.api_version.supports_prepare_reset() => {
                Ok(StateChange::to(AgentState::Recognized(p.registration.clone())))
            }
            _ => Err(self.illegal("reset state")),
        }
    }

    /// Never fails: an agent in an action tells its job it is gone, anything else has nothing to clean up.
    pub fn handle_closed_connection(&self) -> StateChange {
        match (self.registration(), self.job()) {
            (Some(registration), Some(job)) => StateChange::with_effect(
                self.clone(),
                Effect::NotifyDisconnecting { agent_id: registration.agent_id.clone(), job },
            ),
            _ => self.unchanged(),
        }
    }
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct(self.name());
        if let Some(registration) = self.registration() {
            s.field("agent_id", &registration.agent_id);
        }
        if let Some(job) = self.job() {
            s.field("action_id", &job.action_id());
        }
        s.finish()
    }
}
