//! Agents connected to the orchestrator and the state machine driving them.

pub mod api_version;
pub mod effect;
pub mod registration;
pub mod repository;
pub mod state;
pub mod stream;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::agent::api_version::ApiVersion;
use crate::agent::effect::{Effect, EffectContext, StateChange};
use crate::agent::registration::SoftwareVersion;
use crate::agent::repository::AgentRepository;
use crate::agent::state::AgentState;
use crate::agent::stream::AgentCommandSink;
use crate::error::Result;
use crate::job::{Job, RestoreJob};
use crate::protocol::AgentControl;

/// What the control plane reports about an agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub api_version: ApiVersion,
    pub scope: String,
    pub state: &'static str,
    pub action_id: Option<String>,
    pub software_version: SoftwareVersion,
}

/// One agent connection. Operations on it are serialized by the state lock;
/// effects run after the lock is released.
pub struct Agent {
    state: Mutex<AgentState>,
    stream: Arc<dyn AgentCommandSink>,
    repository: Arc<AgentRepository>,
}

impl Agent {
    pub fn new(stream: Arc<dyn AgentCommandSink>, repository: Arc<AgentRepository>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AgentState::Unrecognized),
            stream,
            repository,
        })
    }

    /// Computes the change under the lock, commits it, then runs the effect unlocked.
    fn apply(self: &Arc<Self>, operation: impl FnOnce(&AgentState) -> Result<StateChange>) -> Result<()> {
        let effect = {
            let mut state = self.state.lock();
            let change = operation(&state)?;
            *state = change.next_state;
            change.effect
        };
        match effect {
            Some(effect) => self.run(effect),
            None => Ok(()),
        }
    }

    fn run(self: &Arc<Self>, effect: Effect) -> Result<()> {
        let ctx = EffectContext {
            agent: self,
            stream: self.stream.as_ref(),
            repository: &self.repository,
        };
        effect.execute(&ctx).inspect_err(|e| {
            tracing::warn!(agent = ?*self.state.lock(), "Agent state committed but its side effect failed: {e}");
        })
    }

    pub fn process_message(self: &Arc<Self>, message: &AgentControl) -> Result<()> {
        self.apply(|state| state.process_message(message))
    }

    pub fn prepare_for_backup(self: &Arc<Self>, job: Arc<dyn Job>) -> Result<()> {
        self.apply(|state| state.prepare_for_backup(job))
    }

    pub fn prepare_for_restore(self: &Arc<Self>, job: Arc<dyn RestoreJob>) -> Result<()> {
        self.apply(|state| state.prepare_for_restore(job))
    }

    pub fn execute_backup(self: &Arc<Self>) -> Result<()> {
        self.apply(AgentState::execute_backup)
    }

    pub fn execute_backup_post_action(self: &Arc<Self>) -> Result<()> {
        self.apply(AgentState::execute_backup_post_action)
    }

    pub fn execute_restore(self: &Arc<Self>) -> Result<()> {
        self.apply(AgentState::execute_restore)
    }

    pub fn execute_restore_post_action(self: &Arc<Self>) -> Result<()> {
        self.apply(AgentState::execute_restore_post_action)
    }

    pub fn cancel_action(self: &Arc<Self>) -> Result<()> {
        self.apply(AgentState::cancel_action)
    }

    /// Called by a job once it is done with this agent.
    pub fn finish_action(self: &Arc<Self>) -> Result<()> {
        self.apply(AgentState::reset_state)
    }

    /// Drops the connection, lets the current job know and forgets the agent.
    pub fn close_connection(self: &Arc<Self>) {
        self.stream.close();
        if let Err(e) = self.apply(|state| Ok(state.handle_closed_connection())) {
            tracing::warn!("Failed to handle closed connection: {e}");
        }
        let agent_id = self.state.lock().registration().map(|r| r.agent_id.clone());
        if let Some(agent_id) = agent_id {
            tracing::info!(agent_id = %agent_id, "Agent connection closed");
            self.repository.remove_agent(self);
        }
    }

    pub fn agent_id(&self) -> Result<String> {
        self.state.lock().agent_id().map(str::to_string)
    }

    pub fn api_version(&self) -> Result<ApiVersion> {
        self.state.lock().api_version().cloned()
    }

    pub fn scope(&self) -> Result<String> {
        self.state.lock().scope().map(str::to_string)
    }

    pub fn software_version(&self) -> Result<SoftwareVersion> {
        self.state.lock().software_version()
    }

    pub fn state_name(&self) -> &'static str {
        self.state.lock().name()
    }

    pub fn info(&self) -> Result<AgentInfo> {
        let state = self.state.lock();
        let registration = state.registration().ok_or_else(|| {
            crate::error::OrchestratorError::IllegalTransition {
                agent_id: None,
                state: state.name(),
                operation: "describe agent",
            }
        })?;
        Ok(AgentInfo {
            agent_id: registration.agent_id.clone(),
            api_version: registration.api_version.clone(),
            scope: registration.scope.clone(),
            state: state.name(),
            action_id: state.job().map(|job| job.action_id()),
            software_version: registration.software_version(),
        })
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("state", &*self.state.lock()).finish()
    }
}
