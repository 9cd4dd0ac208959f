//! Side effects produced by agent state transitions.
//!
//! A transition never talks to the transport, the job or the repository
//! itself. It returns a [`StateChange`] whose [`Effect`] is run by the
//! [`Agent`](crate::agent::Agent) only after the new state is committed.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::agent::repository::AgentRepository;
use crate::agent::state::AgentState;
use crate::agent::stream::AgentCommandSink;
use crate::agent::Agent;
use crate::error::{OrchestratorError, Result};
use crate::job::{JobHandle, RestoreJob};
use crate::models::action::ActionType;
use crate::protocol::{ActionKind, StageComplete};

/// Outcome of applying one operation to an agent state.
#[derive(Debug)]
pub struct StateChange {
    pub next_state: AgentState,
    pub effect: Option<Effect>,
}

impl StateChange {
    pub fn to(next_state: AgentState) -> Self {
        Self { next_state, effect: None }
    }

    pub fn with_effect(next_state: AgentState, effect: Effect) -> Self {
        Self { next_state, effect: Some(effect) }
    }
}

#[derive(Debug)]
pub enum Effect {
    AddAgentToRepository,
    SendPrepareForBackup {
        backup_name: String,
        backup_manager_id: String,
    },
    SendPrepareForRestore {
        agent_id: String,
        job: Arc<dyn RestoreJob>,
        send_fragment_list: bool,
    },
    SendExecuteBackup,
    SendBackupPostAction,
    SendExecuteRestore,
    SendRestorePostAction,
    SendCancel(ActionKind),
    UpdateProgress {
        agent_id: String,
        job: JobHandle,
        stage_complete: StageComplete,
        metrics: Option<StageMetrics>,
    },
    NotifyDisconnecting {
        agent_id: String,
        job: JobHandle,
    },
}

/// Granular per-agent stage timing, reported when an agent completes a stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageMetrics {
    pub agent_id: String,
    pub action: ActionType,
    pub action_id: String,
    pub backup_manager_id: String,
    pub stage: String,
    pub success: bool,
    /// Zero when the stage failed.
    pub duration_secs: i64,
    pub ended_at: DateTime<Utc>,
}

impl StageMetrics {
    pub fn capture(agent_id: &str, job: &JobHandle, stage_started: DateTime<Utc>, success: bool) -> Self {
        let ended_at = Utc::now();
        let duration_secs = if success {
            ended_at.timestamp() - stage_started.timestamp()
        } else {
            0
        };
        Self {
            agent_id: agent_id.to_string(),
            action: job.action_type(),
            action_id: job.action_id(),
            backup_manager_id: job.backup_manager_id(),
            stage: job.job_stage(),
            success,
            duration_secs,
            ended_at,
        }
    }

    pub fn emit(&self) {
        let status = if self.success { "SUCCESSFUL" } else { "FAILED" };
        tracing::info!(
            target: "bro::metrics",
            agent = %self.agent_id,
            action = %self.action,
            action_id = %self.action_id,
            backup_type = %self.backup_manager_id,
            stage = %self.stage,
            status = status,
            granular_stage_duration_seconds = self.duration_secs,
            granular_end_time = self.ended_at.timestamp(),
            "Agent stage complete"
        );
    }
}

/// What an effect needs from the world outside the state machine.
pub struct EffectContext<'a> {
    pub agent: &'a Arc<Agent>,
    pub stream: &'a dyn AgentCommandSink,
    pub repository: &'a AgentRepository,
}

impl Effect {
    pub fn execute(self, ctx: &EffectContext<'_>) -> Result<()> {
        match self {
            Effect::AddAgentToRepository => match ctx.repository.add_agent(ctx.agent.clone()) {
                Ok(()) => ctx.stream.acknowledge_registration(),
                Err(e) => {
                    ctx.stream.reject_registration(&e.to_string());
                    ctx.stream.close();
                    Err(e)
                }
            },
            Effect::SendPrepareForBackup { backup_name, backup_manager_id } => {
                ctx.stream.prepare_for_backup(&backup_name, &backup_manager_id)
            }
            Effect::SendPrepareForRestore { agent_id, job, send_fragment_list } => {
                let restore_information = job
                    .create_restore_information(&agent_id)
                    .map_err(OrchestratorError::Internal)?;
                ctx.stream.prepare_for_restore(&restore_information)?;
                if send_fragment_list {
                    ctx.stream.send_fragment_list(&restore_information)?;
                }
                Ok(())
            }
            Effect::SendExecuteBackup => ctx.stream.execute_backup(),
            Effect::SendBackupPostAction => ctx.stream.execute_backup_post_action(),
            Effect::SendExecuteRestore => ctx.stream.execute_restore(),
            Effect::SendRestorePostAction => ctx.stream.execute_restore_post_action(),
            Effect::SendCancel(kind) => ctx.stream.cancel_action(kind),
            Effect::UpdateProgress { agent_id, job, stage_complete, metrics } => {
                if let Some(metrics) = metrics {
                    metrics.emit();
                }
                job.update_progress(&agent_id, &stage_complete)
                    .map_err(OrchestratorError::Internal)
            }
            Effect::NotifyDisconnecting { agent_id, job } => {
                // Disconnect failures are logged only.
                if let Err(e) = job.handle_agent_disconnecting(&agent_id) {
                    tracing::warn!(agent_id = %agent_id, action_id = %job.action_id(), "Job failed to handle agent disconnect: {e:#}");
                }
                Ok(())
            }
        }
    }
}
