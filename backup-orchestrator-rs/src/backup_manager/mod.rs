//! Backup managers and the backups and actions they hold.
//!
//! A manager is virtual (a vBRM) when it has a parent. Virtual managers see
//! their parent's backups as readable but never own them. Backup ids are
//! unique across the readable lists of a manager and all its virtual children.

pub mod init_gate;
pub mod repository;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::db::store::{ManagerRecord, ManagerStore};
use crate::error::{EntityKind, OrchestratorError, Result};
use crate::models::action::{Action, ActionType};
use crate::models::backup::Backup;

use self::repository::BackupManagerRepository;

pub const DEFAULT_BACKUP_MANAGER_ID: &str = "DEFAULT";

/// Suffix of the virtual manager used to reset a manager's configuration.
pub const RESET_BACKUP_MANAGER_SUFFIX: &str = "-bro";

/// Separator between backup manager ids in an agent's scope.
pub const SCOPE_SEPARATOR: char = ';';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    Owned,
    Readable,
}

/// Which per-agent virtual managers get created automatically on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VbrmAutoCreate {
    None,
    Default,
    #[default]
    All,
}

impl std::str::FromStr for VbrmAutoCreate {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(VbrmAutoCreate::None),
            "DEFAULT" => Ok(VbrmAutoCreate::Default),
            "ALL" => Ok(VbrmAutoCreate::All),
            other => Err(format!("Invalid vBRM auto create mode <{other}>")),
        }
    }
}

pub fn is_reset_backup_manager(id: &str) -> bool {
    id.ends_with(RESET_BACKUP_MANAGER_SUFFIX)
}

/// Maps the empty id agents use for "no scope" onto the default manager.
pub fn parse_backup_manager_id(id: &str) -> &str {
    if id.is_empty() {
        DEFAULT_BACKUP_MANAGER_ID
    } else {
        id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VirtualInformation {
    pub parent_id: String,
    pub agent_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct BackupLists {
    owned: Vec<Arc<Backup>>,
    readable: Vec<Arc<Backup>>,
}

impl BackupLists {
    fn has_readable(&self, backup_id: &str) -> bool {
        self.readable.iter().any(|b| b.id() == backup_id)
    }
}

pub struct BackupManager {
    id: String,
    virtual_information: VirtualInformation,
    backups: Mutex<BackupLists>,
    actions: Mutex<Vec<Arc<Action>>>,
    store: Arc<dyn ManagerStore>,
    repository: Weak<BackupManagerRepository>,
}

impl BackupManager {
    pub(crate) fn new(
        id: impl Into<String>,
        virtual_information: VirtualInformation,
        store: Arc<dyn ManagerStore>,
        repository: Weak<BackupManagerRepository>,
    ) -> Self {
        Self {
            id: id.into(),
            virtual_information,
            backups: Mutex::new(BackupLists::default()),
            actions: Mutex::new(Vec::new()),
            store,
            repository,
        }
    }

    /// Fills the lists from storage without any uniqueness checks or writes.
    pub(crate) fn load(&self) -> Result<()> {
        let backups = self.store.load_backups(&self.id)?;
        let actions = self.store.load_actions(&self.id)?;
        {
            let mut lists = self.backups.lock();
            for record in backups {
                let backup = Arc::new(Backup::from_record(record));
                lists.readable.push(backup.clone());
                lists.owned.push(backup);
            }
        }
        self.actions
            .lock()
            .extend(actions.into_iter().map(|r| Arc::new(Action::from_record(r))));
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn virtual_information(&self) -> &VirtualInformation {
        &self.virtual_information
    }

    pub fn parent_id(&self) -> &str {
        &self.virtual_information.parent_id
    }

    pub fn is_virtual(&self) -> bool {
        !self.virtual_information.parent_id.is_empty()
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_BACKUP_MANAGER_ID
    }

    /// Agents only know real managers; a vBRM speaks to them with its parent's id.
    pub fn agent_visible_id(&self) -> &str {
        if self.is_virtual() {
            self.parent_id()
        } else {
            &self.id
        }
    }

    pub fn parent(&self) -> Option<Arc<BackupManager>> {
        if !self.is_virtual() {
            return None;
        }
        self.repository
            .upgrade()
            .and_then(|repo| repo.get_backup_manager(self.parent_id()).ok())
    }

    pub fn children(&self) -> Vec<Arc<BackupManager>> {
        self.repository
            .upgrade()
            .map(|repo| repo.get_children(&self.id))
            .unwrap_or_default()
    }

    pub fn owns_agent(&self, scope: &str, agent_id: &str) -> bool {
        self.is_default()
            || scope.split(SCOPE_SEPARATOR).any(|s| s == self.id)
            || (self.is_virtual() && self.virtual_information.agent_ids.iter().any(|a| a == agent_id))
    }

    pub fn record(&self) -> ManagerRecord {
        ManagerRecord {
            id: self.id.clone(),
            parent_id: self.virtual_information.parent_id.clone(),
            agent_ids: self.virtual_information.agent_ids.clone(),
        }
    }

    pub fn persist(&self) -> Result<()> {
        self.store.save_manager(&self.record())?;
        Ok(())
    }

    // ── Backups ──

    pub fn has_readable_backup(&self, backup_id: &str) -> bool {
        self.backups.lock().has_readable(backup_id)
    }

    pub fn add_backup(&self, backup: Arc<Backup>, ownership: Ownership) -> Result<()> {
        let children = self.children();
        let mut lists = self.backups.lock();
        if lists.has_readable(backup.id()) || children.iter().any(|c| c.has_readable_backup(backup.id())) {
            return Err(OrchestratorError::DuplicateBackupId(backup.id().to_string()));
        }
        if ownership == Ownership::Owned {
            self.store.save_backup(&backup.record())?;
            lists.owned.push(backup.clone());
        }
        lists.readable.push(backup);
        Ok(())
    }

    /// Drops the backup from every list it is in. Removing an absent backup is a no-op.
    pub fn remove_backup(&self, backup: &Backup) -> Result<()> {
        let was_owned = {
            let mut lists = self.backups.lock();
            let before = lists.owned.len();
            lists.owned.retain(|b| b.id() != backup.id());
            lists.readable.retain(|b| b.id() != backup.id());
            lists.owned.len() != before
        };
        if was_owned {
            self.store.delete_backup(&self.id, backup.id())?;
        }
        Ok(())
    }

    pub fn persist_backup(&self, backup: &Backup) -> Result<()> {
        self.store.save_backup(&backup.record())?;
        Ok(())
    }

    pub fn backups(&self, ownership: Ownership) -> Vec<Arc<Backup>> {
        let lists = self.backups.lock();
        match ownership {
            Ownership::Owned => lists.owned.clone(),
            Ownership::Readable => lists.readable.clone(),
        }
    }

    pub fn backup(&self, backup_id: &str, ownership: Ownership) -> Result<Arc<Backup>> {
        self.backups(ownership)
            .into_iter()
            .find(|b| b.id() == backup_id)
            .ok_or_else(|| OrchestratorError::not_found(EntityKind::Backup, backup_id))
    }

    pub fn backup_by_name(&self, name: &str, ownership: Ownership) -> Result<Arc<Backup>> {
        self.backups(ownership)
            .into_iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| OrchestratorError::not_found(EntityKind::Backup, name))
    }

    /// Position of a backup in the readable list.
    pub fn backup_index(&self, backup_id: &str) -> Option<usize> {
        self.backups.lock().readable.iter().position(|b| b.id() == backup_id)
    }

    pub fn owns_backup(&self, name: &str) -> bool {
        self.backups.lock().owned.iter().any(|b| b.name() == name)
    }

    /// Owned backups, the next one housekeeping should remove first.
    pub fn backups_by_deletion_priority(&self) -> Vec<Arc<Backup>> {
        let mut backups = self.backups(Ownership::Owned);
        backups.sort_by(|a, b| a.deletion_priority_cmp(b));
        backups
    }

    /// Shares readable backups with the direct virtual children. Only one level deep.
    pub fn sync_children(&self) {
        let children = self.children();
        if children.is_empty() {
            return;
        }
        let lists = self.backups.lock();
        for child in children {
            for backup in lists.readable.iter().filter(|b| !child.has_readable_backup(b.id())) {
                if let Err(e) = child.add_backup(backup.clone(), Ownership::Readable) {
                    tracing::warn!(backup_manager_id = %child.id(), backup_id = %backup.id(), "Failed to share backup with child: {e}");
                }
            }
        }
    }

    // ── Actions ──

    pub fn add_action(&self, action: Arc<Action>) -> Result<()> {
        let mut actions = self.actions.lock();
        if actions.iter().any(|a| a.id() == action.id()) {
            return Err(OrchestratorError::DuplicateActionId(action.id().to_string()));
        }
        self.store.save_action(&action.record())?;
        actions.push(action);
        Ok(())
    }

    pub fn remove_action(&self, action: &Action) -> Result<()> {
        let removed = {
            let mut actions = self.actions.lock();
            let before = actions.len();
            actions.retain(|a| **a != *action);
            actions.len() != before
        };
        if removed {
            self.store.delete_action(&self.id, action.id())?;
        }
        Ok(())
    }

    pub fn persist_action(&self, action: &Action) -> Result<()> {
        self.store.save_action(&action.record())?;
        Ok(())
    }

    /// Creates and registers a running action with a fresh id.
    pub fn create_action(&self, action_type: ActionType, backup_name: Option<String>) -> Result<Arc<Action>> {
        loop {
            let id = (uuid::Uuid::new_v4().as_u128() % 65_536).to_string();
            let action = Arc::new(Action::new(id, self.id.clone(), action_type, backup_name.clone()));
            match self.add_action(action.clone()) {
                Ok(()) => return Ok(action),
                Err(OrchestratorError::DuplicateActionId(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn actions(&self) -> Vec<Arc<Action>> {
        self.actions.lock().clone()
    }

    pub fn action(&self, action_id: &str) -> Result<Arc<Action>> {
        self.actions
            .lock()
            .iter()
            .find(|a| a.id() == action_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(EntityKind::Action, action_id))
    }

    /// Most recent action that is not housekeeping.
    pub fn last_action(&self) -> Option<Arc<Action>> {
        self.actions
            .lock()
            .iter()
            .rev()
            .find(|a| !a.action_type().is_housekeeping())
            .cloned()
    }

    pub fn last_completed_action(&self) -> Option<Arc<Action>> {
        self.actions
            .lock()
            .iter()
            .filter(|a| a.is_completed())
            .max_by_key(|a| a.completion_time())
            .cloned()
    }

    pub fn last_action_for(&self, backup_name: &str, action_type: ActionType) -> Option<Arc<Action>> {
        self.actions
            .lock()
            .iter()
            .filter(|a| a.action_type() == action_type && a.backup_name() == Some(backup_name))
            .max_by_key(|a| a.start_time())
            .cloned()
    }
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("id", &self.id)
            .field("virtual_information", &self.virtual_information)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::models::action::ResultType;
    use crate::models::backup::BackupStatus;

    fn standalone(id: &str, parent_id: &str, agent_ids: &[&str]) -> BackupManager {
        let store: Arc<dyn ManagerStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let manager = BackupManager::new(
            id,
            VirtualInformation {
                parent_id: parent_id.into(),
                agent_ids: agent_ids.iter().map(|a| a.to_string()).collect(),
            },
            store,
            Weak::new(),
        );
        manager.persist().unwrap();
        manager
    }

    #[test]
    fn test_owned_backup_is_also_readable() {
        let manager = standalone("DEFAULT", "", &[]);
        let backup = Arc::new(Backup::new("DEFAULT", "b1"));

        manager.add_backup(backup.clone(), Ownership::Owned).unwrap();

        assert_eq!(manager.backups(Ownership::Owned).len(), 1);
        assert_eq!(manager.backups(Ownership::Readable).len(), 1);
        assert!(manager.owns_backup("b1"));
        assert_eq!(manager.backup_index("b1"), Some(0));
    }

    #[test]
    fn test_readable_backup_is_not_owned() {
        let manager = standalone("DEFAULT", "", &[]);
        manager.add_backup(Arc::new(Backup::new("other", "b1")), Ownership::Readable).unwrap();

        assert!(manager.backups(Ownership::Owned).is_empty());
        assert!(manager.backup("b1", Ownership::Readable).is_ok());
        assert!(matches!(
            manager.backup("b1", Ownership::Owned),
            Err(OrchestratorError::NotFound { kind: EntityKind::Backup, .. })
        ));
    }

    #[test]
    fn test_duplicate_backup_id_rejected() {
        let manager = standalone("DEFAULT", "", &[]);
        manager.add_backup(Arc::new(Backup::new("DEFAULT", "b1")), Ownership::Owned).unwrap();

        let err = manager
            .add_backup(Arc::new(Backup::new("DEFAULT", "b1")), Ownership::Readable)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateBackupId(id) if id == "b1"));
        assert_eq!(manager.backups(Ownership::Readable).len(), 1);
    }

    #[test]
    fn test_remove_backup_is_idempotent() {
        let manager = standalone("DEFAULT", "", &[]);
        let backup = Arc::new(Backup::new("DEFAULT", "b1"));
        manager.add_backup(backup.clone(), Ownership::Owned).unwrap();

        manager.remove_backup(&backup).unwrap();
        manager.remove_backup(&backup).unwrap();
        assert!(manager.backups(Ownership::Readable).is_empty());
        assert!(manager.backups(Ownership::Owned).is_empty());
    }

    #[test]
    fn test_owns_agent() {
        let default = standalone("DEFAULT", "", &[]);
        let alpha = standalone("alpha", "", &[]);
        let vbrm = standalone("alpha-a1", "alpha", &["a1"]);

        assert!(default.owns_agent("", "anyone"));
        assert!(alpha.owns_agent("beta;alpha", "a2"));
        assert!(!alpha.owns_agent("alphabet", "a2"));
        assert!(vbrm.owns_agent("", "a1"));
        assert!(!vbrm.owns_agent("", "a2"));
        assert!(!alpha.owns_agent("", "a1"));
    }

    #[test]
    fn test_agent_visible_id() {
        assert_eq!(standalone("alpha", "", &[]).agent_visible_id(), "alpha");
        assert_eq!(standalone("alpha-bro", "alpha", &[]).agent_visible_id(), "alpha");
    }

    #[test]
    fn test_duplicate_action_id_rejected() {
        let manager = standalone("DEFAULT", "", &[]);
        manager
            .add_action(Arc::new(Action::new("1", "DEFAULT", ActionType::CreateBackup, None)))
            .unwrap();
        let err = manager
            .add_action(Arc::new(Action::new("1", "DEFAULT", ActionType::Restore, None)))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateActionId(_)));
    }

    #[test]
    fn test_last_action_skips_housekeeping() {
        let manager = standalone("DEFAULT", "", &[]);
        let create = manager.create_action(ActionType::CreateBackup, Some("b1".into())).unwrap();
        manager.create_action(ActionType::Housekeeping, None).unwrap();

        assert_eq!(manager.last_action().unwrap().id(), create.id());
        assert!(manager.last_completed_action().is_none());

        create.finish(ResultType::Success, None);
        assert_eq!(manager.last_completed_action().unwrap().id(), create.id());
        assert_eq!(
            manager.last_action_for("b1", ActionType::CreateBackup).unwrap().id(),
            create.id()
        );
        assert!(manager.last_action_for("b1", ActionType::Restore).is_none());
    }

    #[test]
    fn test_remove_action() {
        let manager = standalone("DEFAULT", "", &[]);
        let action = manager.create_action(ActionType::Export, None).unwrap();
        manager.remove_action(&action).unwrap();
        assert!(manager.action(action.id()).is_err());
    }

    #[test]
    fn test_deletion_priority_puts_corrupted_first() {
        let manager = standalone("DEFAULT", "", &[]);
        let good = Arc::new(Backup::new("DEFAULT", "good"));
        good.set_status(BackupStatus::Complete);
        let bad = Arc::new(Backup::new("DEFAULT", "bad"));
        bad.set_status(BackupStatus::Corrupted);
        manager.add_backup(good, Ownership::Owned).unwrap();
        manager.add_backup(bad, Ownership::Owned).unwrap();

        let order: Vec<String> = manager
            .backups_by_deletion_priority()
            .iter()
            .map(|b| b.name().to_string())
            .collect();
        assert_eq!(order, ["bad", "good"]);
    }

    #[test]
    fn test_vbrm_auto_create_parse() {
        assert_eq!("all".parse::<VbrmAutoCreate>().unwrap(), VbrmAutoCreate::All);
        assert_eq!("DEFAULT".parse::<VbrmAutoCreate>().unwrap(), VbrmAutoCreate::Default);
        assert_eq!("None".parse::<VbrmAutoCreate>().unwrap(), VbrmAutoCreate::None);
        assert!("some".parse::<VbrmAutoCreate>().is_err());
    }
}
