use std::sync::Arc;

use crate::agent::repository::AgentRepository;
use crate::backup_manager::repository::BackupManagerRepository;
use crate::config::AppConfig;

pub struct AppState {
    pub config: AppConfig,
    pub agents: Arc<AgentRepository>,
    pub backup_managers: Arc<BackupManagerRepository>,
}

impl AppState {
    pub fn new(config: AppConfig, backup_managers: Arc<BackupManagerRepository>) -> Self {
        Self {
            config,
            agents: Arc::new(AgentRepository::new(backup_managers.clone())),
            backup_managers,
        }
    }
}
