use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::agent::Agent;
use crate::backup_manager::repository::BackupManagerRepository;
use crate::backup_manager::{VbrmAutoCreate, DEFAULT_BACKUP_MANAGER_ID, SCOPE_SEPARATOR};
use crate::error::{EntityKind, OrchestratorError, Result};

/// Registered agents, keyed by agent id.
pub struct AgentRepository {
    agents: DashMap<String, Arc<Agent>>,
    backup_managers: Arc<BackupManagerRepository>,
}

impl AgentRepository {
    pub fn new(backup_managers: Arc<BackupManagerRepository>) -> Self {
        Self {
            agents: DashMap::new(),
            backup_managers,
        }
    }

    /// Stores a freshly registered agent and creates the backup managers its scope calls for.
    pub fn add_agent(&self, agent: Arc<Agent>) -> Result<()> {
        let agent_id = agent.agent_id()?;
        if agent_id.is_empty() {
            return Err(OrchestratorError::InvalidId {
                id: agent_id,
                reason: "agent registered without an id",
            });
        }
        let scope = agent.scope()?;

        match self.agents.entry(agent_id.clone()) {
            Entry::Occupied(_) => return Err(OrchestratorError::AgentAlreadyRegistered(agent_id)),
            Entry::Vacant(slot) => {
                slot.insert(agent);
            }
        }
        tracing::info!(agent_id = %agent_id, scope = %scope, "Added agent");

        // The agent is registered even if a manager cannot be created.
        if let Err(e) = self.create_backup_managers(&agent_id, &scope) {
            tracing::error!(agent_id = %agent_id, "Failed to create backup managers for agent: {e}");
        }
        Ok(())
    }

    fn create_backup_managers(&self, agent_id: &str, scope: &str) -> Result<()> {
        let mode = self.backup_managers.vbrm_auto_create();
        if mode != VbrmAutoCreate::None {
            self.backup_managers
                .create_backup_manager("", DEFAULT_BACKUP_MANAGER_ID, Vec::new())?;
            self.backup_managers.create_backup_manager(
                DEFAULT_BACKUP_MANAGER_ID,
                &auto_vbrm_id(DEFAULT_BACKUP_MANAGER_ID, agent_id),
                vec![agent_id.to_string()],
            )?;
        }
        for scope in scope.split(SCOPE_SEPARATOR) {
            self.backup_managers.create_backup_manager("", scope, Vec::new())?;
            if mode == VbrmAutoCreate::All && !scope.is_empty() {
                self.backup_managers.create_backup_manager(
                    scope,
                    &auto_vbrm_id(scope, agent_id),
                    vec![agent_id.to_string()],
                )?;
            }
        }
        Ok(())
    }

    /// Forgets `agent` if it is the one registered under its id.
    pub fn remove_agent(&self, agent: &Arc<Agent>) {
        let Ok(agent_id) = agent.agent_id() else {
            return;
        };
        if self.agents.remove_if(&agent_id, |_, stored| Arc::ptr_eq(stored, agent)).is_some() {
            tracing::info!(agent_id = %agent_id, "Removed agent");
        }
    }

    pub fn agents(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<(String, Arc<Agent>)> = self
            .agents
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        agents.sort_by(|a, b| a.0.cmp(&b.0));
        agents.into_iter().map(|(_, agent)| agent).collect()
    }

    pub fn agent(&self, agent_id: &str) -> Result<Arc<Agent>> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| OrchestratorError::not_found(EntityKind::Agent, agent_id))
    }

    pub fn backup_managers(&self) -> &Arc<BackupManagerRepository> {
        &self.backup_managers
    }
}

fn auto_vbrm_id(scope: &str, agent_id: &str) -> String {
    format!("{scope}-{agent_id}")
}
