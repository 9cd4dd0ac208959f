use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::backup_manager::init_gate::InitGate;
use crate::backup_manager::{
    is_reset_backup_manager, parse_backup_manager_id, BackupManager, Ownership, VbrmAutoCreate, VirtualInformation,
    DEFAULT_BACKUP_MANAGER_ID, RESET_BACKUP_MANAGER_SUFFIX,
};
use crate::db::store::{ManagerRecord, ManagerStore};
use crate::error::{EntityKind, OrchestratorError, Result};
use crate::ids::validate_id;

/// Every backup manager of the process, real and virtual.
///
/// Creation is closed until [`finish_initialization`](Self::finish_initialization)
/// so nothing can race the load of persisted managers at boot.
pub struct BackupManagerRepository {
    managers: RwLock<Vec<Arc<BackupManager>>>,
    gate: InitGate,
    creation: Mutex<()>,
    store: Arc<dyn ManagerStore>,
    vbrm_auto_create: VbrmAutoCreate,
    delete_vbrm: bool,
    self_ref: Weak<BackupManagerRepository>,
}

impl BackupManagerRepository {
    pub fn new(store: Arc<dyn ManagerStore>, vbrm_auto_create: VbrmAutoCreate, delete_vbrm: bool) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            managers: RwLock::new(Vec::new()),
            gate: InitGate::default(),
            creation: Mutex::new(()),
            store,
            vbrm_auto_create,
            delete_vbrm,
            self_ref: self_ref.clone(),
        })
    }

    pub fn vbrm_auto_create(&self) -> VbrmAutoCreate {
        self.vbrm_auto_create
    }

    /// Loads persisted managers and repairs what a previous run left behind. Runs before the gate opens.
    pub fn initialize_backup_managers(&self) -> Result<()> {
        tracing::debug!("Initialize backup managers");
        let _creating = self.creation.lock();

        let mut discarded = Vec::new();
        for record in self.store.load_managers()? {
            if self.delete_vbrm && !self.is_vbrm_required(&record) {
                discarded.push(record.id);
                continue;
            }
            let manager = Arc::new(self.build(record.id, VirtualInformation {
                parent_id: record.parent_id,
                agent_ids: record.agent_ids,
            }));
            manager.load()?;
            for action in manager.actions() {
                if action.fail_if_running() {
                    manager.persist_action(&action)?;
                }
            }
            for backup in manager.backups(Ownership::Owned) {
                if backup.corrupt_if_incomplete() {
                    manager.persist_backup(&backup)?;
                }
            }
            self.managers.write().push(manager);
        }

        for id in discarded {
            tracing::info!(backup_manager_id = %id, "Deleting vBRM no longer required by auto create mode {:?}", self.vbrm_auto_create);
            self.store.delete_manager(&id)?;
        }

        for manager in self.backup_managers() {
            manager.sync_children();
        }

        let missing_reset: Vec<String> = self
            .backup_managers()
            .iter()
            .filter(|m| !m.is_virtual() && !is_reset_backup_manager(m.id()))
            .filter(|m| self.find(&reset_backup_manager_id(m.id())).is_none())
            .map(|m| m.id().to_string())
            .collect();
        for id in missing_reset {
            self.create_locked(&id, &reset_backup_manager_id(&id), Vec::new())?;
        }

        tracing::info!("Loaded {} backup managers", self.managers.read().len());
        Ok(())
    }

    fn is_vbrm_required(&self, record: &ManagerRecord) -> bool {
        if is_reset_backup_manager(&record.id) || self.vbrm_auto_create == VbrmAutoCreate::All {
            return true;
        }
        if record.parent_id.is_empty() {
            return true;
        }
        self.vbrm_auto_create == VbrmAutoCreate::Default && record.parent_id == DEFAULT_BACKUP_MANAGER_ID
    }

    pub fn finish_initialization(&self) {
        self.gate.open();
        tracing::info!("Backup manager repository initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.gate.is_open()
    }

    /// Creates a manager unless one with that id exists. Blocks until initialization has finished.
    ///
    /// A real manager gets its reset vBRM alongside. A new vBRM receives its parent's backups.
    pub fn create_backup_manager(&self, parent_id: &str, id: &str, agent_ids: Vec<String>) -> Result<Arc<BackupManager>> {
        let id = parse_backup_manager_id(id);
        validate_id(id)?;
        self.gate.wait();
        let _creating = self.creation.lock();
        self.create_locked(parent_id, id, agent_ids)
    }

    fn create_locked(&self, parent_id: &str, id: &str, agent_ids: Vec<String>) -> Result<Arc<BackupManager>> {
        if let Some(existing) = self.find(id) {
            return Ok(existing);
        }
        if !parent_id.is_empty() {
            if parent_id == id {
                return Err(OrchestratorError::InvalidId {
                    id: id.to_string(),
                    reason: "backup manager cannot be its own parent",
                });
            }
            self.get_backup_manager(parent_id)?;
        }

        tracing::info!(backup_manager_id = %id, parent_id = %parent_id, "Setting backup manager");
        let manager = Arc::new(self.build(id.to_string(), VirtualInformation {
            parent_id: parent_id.to_string(),
            agent_ids,
        }));
        manager.persist()?;
        // Released before syncing: the parent looks its children up through this list.
        self.managers.write().push(manager.clone());

        if let Some(parent) = manager.parent() {
            parent.sync_children();
        } else if !is_reset_backup_manager(id) {
            self.create_locked(id, &reset_backup_manager_id(id), Vec::new())?;
        }
        Ok(manager)
    }

    fn build(&self, id: String, virtual_information: VirtualInformation) -> BackupManager {
        BackupManager::new(id, virtual_information, self.store.clone(), self.self_ref.clone())
    }

    fn find(&self, id: &str) -> Option<Arc<BackupManager>> {
        self.managers.read().iter().find(|m| m.id() == id).cloned()
    }

    pub fn backup_managers(&self) -> Vec<Arc<BackupManager>> {
        self.managers.read().clone()
    }

    pub fn get_backup_manager(&self, id: &str) -> Result<Arc<BackupManager>> {
        self.find(id)
            .ok_or_else(|| OrchestratorError::not_found(EntityKind::BackupManager, id))
    }

    pub fn index_of(&self, id: &str) -> Result<usize> {
        self.managers
            .read()
            .iter()
            .position(|m| m.id() == id)
            .ok_or_else(|| OrchestratorError::not_found(EntityKind::BackupManager, id))
    }

    /// Virtual managers whose parent is `id`.
    pub fn get_children(&self, id: &str) -> Vec<Arc<BackupManager>> {
        self.managers
            .read()
            .iter()
            .filter(|m| m.is_virtual() && m.parent_id() == id)
            .cloned()
            .collect()
    }

    /// Deletes an owned backup and drops it from the readable lists of the owner's children.
    pub fn delete_backup(&self, backup_manager_id: &str, backup_id: &str) -> Result<()> {
        let owner = self.get_backup_manager(backup_manager_id)?;
        let backup = owner.backup(backup_id, Ownership::Owned)?;
        owner.remove_backup(&backup)?;
        for child in self.get_children(backup_manager_id) {
            child.remove_backup(&backup)?;
        }
        tracing::info!(backup_manager_id = %backup_manager_id, backup_id = %backup_id, "Backup deleted");
        Ok(())
    }
}

pub fn reset_backup_manager_id(id: &str) -> String {
    format!("{id}{RESET_BACKUP_MANAGER_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::SqliteStore;
    use crate::models::action::{ActionState, ActionType, ResultType};
    use crate::models::backup::{Backup, BackupStatus};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn store() -> Arc<dyn ManagerStore> {
        Arc::new(SqliteStore::in_memory().unwrap())
    }

    fn ready_repository(store: Arc<dyn ManagerStore>, mode: VbrmAutoCreate, delete_vbrm: bool) -> Arc<BackupManagerRepository> {
        let repo = BackupManagerRepository::new(store, mode, delete_vbrm);
        repo.initialize_backup_managers().unwrap();
        repo.finish_initialization();
        repo
    }

    fn ids(managers: &[Arc<BackupManager>]) -> Vec<String> {
        managers.iter().map(|m| m.id().to_string()).collect()
    }

    #[test]
    fn test_real_manager_gets_reset_vbrm() {
        let repo = ready_repository(store(), VbrmAutoCreate::All, false);
        repo.create_backup_manager("", "", Vec::new()).unwrap();

        assert_eq!(ids(&repo.backup_managers()), ["DEFAULT", "DEFAULT-bro"]);
        let reset = repo.get_backup_manager("DEFAULT-bro").unwrap();
        assert!(reset.is_virtual());
        assert_eq!(reset.parent().unwrap().id(), "DEFAULT");
        assert_eq!(repo.index_of("DEFAULT-bro").unwrap(), 1);
    }

    #[test]
    fn test_create_is_idempotent() {
        let repo = ready_repository(store(), VbrmAutoCreate::All, false);
        let first = repo.create_backup_manager("", "alpha", Vec::new()).unwrap();
        let second = repo.create_backup_manager("", "alpha", Vec::new()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(repo.backup_managers().len(), 2);
    }

    #[test]
    fn test_create_rejects_bad_ids_and_missing_parent() {
        let repo = ready_repository(store(), VbrmAutoCreate::All, false);
        assert!(matches!(
            repo.create_backup_manager("", "../x", Vec::new()),
            Err(OrchestratorError::InvalidId { .. })
        ));
        assert!(matches!(
            repo.create_backup_manager("nope", "child", Vec::new()),
            Err(OrchestratorError::NotFound { kind: EntityKind::BackupManager, .. })
        ));
        assert!(repo.backup_managers().is_empty());
    }

    #[test]
    fn test_create_blocks_until_initialized() {
        let repo = BackupManagerRepository::new(store(), VbrmAutoCreate::All, false);
        repo.initialize_backup_managers().unwrap();
        let created = Arc::new(AtomicBool::new(false));

        let creator = {
            let repo = repo.clone();
            let created = created.clone();
            thread::spawn(move || {
                repo.create_backup_manager("", "alpha", Vec::new()).unwrap();
                created.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!created.load(Ordering::SeqCst));
        assert!(!repo.is_initialized());

        repo.finish_initialization();
        creator.join().unwrap();
        assert!(repo.get_backup_manager("alpha").is_ok());
    }

    #[test]
    fn test_new_vbrm_receives_parent_backups() {
        let repo = ready_repository(store(), VbrmAutoCreate::All, false);
        let parent = repo.create_backup_manager("", "", Vec::new()).unwrap();
        parent.add_backup(Arc::new(Backup::new("DEFAULT", "x")), Ownership::Owned).unwrap();

        let child = repo.create_backup_manager("DEFAULT", "DEFAULT-a1", vec!["a1".into()]).unwrap();

        assert!(child.backup("x", Ownership::Readable).is_ok());
        assert!(child.backups(Ownership::Owned).is_empty());
    }

    #[test]
    fn test_sync_children_adds_missing_without_duplicates() {
        let repo = ready_repository(store(), VbrmAutoCreate::All, false);
        let parent = repo.create_backup_manager("", "", Vec::new()).unwrap();
        let child = repo.get_backup_manager("DEFAULT-bro").unwrap();

        parent.add_backup(Arc::new(Backup::new("DEFAULT", "x")), Ownership::Owned).unwrap();
        assert!(child.backups(Ownership::Readable).is_empty());

        parent.sync_children();
        parent.sync_children();

        let readable = child.backups(Ownership::Readable);
        assert_eq!(readable.len(), 1);
        assert_eq!(readable[0].id(), "x");
    }

    #[test]
    fn test_backup_id_unique_across_children() {
        let repo = ready_repository(store(), VbrmAutoCreate::All, false);
        let parent = repo.create_backup_manager("", "", Vec::new()).unwrap();
        let child = repo.get_backup_manager("DEFAULT-bro").unwrap();
        child.add_backup(Arc::new(Backup::new("elsewhere", "x")), Ownership::Readable).unwrap();

        let err = parent
            .add_backup(Arc::new(Backup::new("DEFAULT", "x")), Ownership::Owned)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateBackupId(_)));
        assert!(parent.backups(Ownership::Readable).is_empty());
    }

    #[test]
    fn test_delete_backup_cascades_to_children() {
        let repo = ready_repository(store(), VbrmAutoCreate::All, false);
        let parent = repo.create_backup_manager("", "", Vec::new()).unwrap();
        parent.add_backup(Arc::new(Backup::new("DEFAULT", "x")), Ownership::Owned).unwrap();
        parent.sync_children();
        let child = repo.get_backup_manager("DEFAULT-bro").unwrap();
        assert!(child.has_readable_backup("x"));

        repo.delete_backup("DEFAULT", "x").unwrap();

        assert!(!parent.has_readable_backup("x"));
        assert!(!child.has_readable_backup("x"));
        assert!(matches!(
            repo.delete_backup("DEFAULT", "x"),
            Err(OrchestratorError::NotFound { kind: EntityKind::Backup, .. })
        ));
    }

    #[test]
    fn test_boot_repairs_previous_run() {
        let store = store();
        let (backup_id, action_id) = {
            let repo = ready_repository(store.clone(), VbrmAutoCreate::All, false);
            let manager = repo.create_backup_manager("", "alpha", Vec::new()).unwrap();
            let backup = Arc::new(Backup::new("alpha", "half-done"));
            manager.add_backup(backup.clone(), Ownership::Owned).unwrap();
            let action = manager.create_action(ActionType::CreateBackup, Some("half-done".into())).unwrap();
            (backup.id().to_string(), action.id().to_string())
        };
        // Simulate a lost reset vBRM.
        store.delete_manager("alpha-bro").unwrap();

        let repo = ready_repository(store.clone(), VbrmAutoCreate::All, false);
        let manager = repo.get_backup_manager("alpha").unwrap();

        let backup = manager.backup(&backup_id, Ownership::Owned).unwrap();
        assert_eq!(backup.status(), BackupStatus::Corrupted);
        let action = manager.action(&action_id).unwrap();
        assert_eq!(action.state(), ActionState::Finished);
        assert_eq!(action.result(), ResultType::Failure);

        let reset = repo.get_backup_manager("alpha-bro").unwrap();
        assert!(reset.has_readable_backup(&backup_id));

        let persisted = store.load_backups("alpha").unwrap();
        assert_eq!(persisted[0].status, BackupStatus::Corrupted);
    }

    #[test]
    fn test_boot_discards_unneeded_vbrms() {
        let store = store();
        {
            let repo = ready_repository(store.clone(), VbrmAutoCreate::All, false);
            repo.create_backup_manager("", "", Vec::new()).unwrap();
            repo.create_backup_manager("", "alpha", Vec::new()).unwrap();
            repo.create_backup_manager("DEFAULT", "DEFAULT-a1", vec!["a1".into()]).unwrap();
            repo.create_backup_manager("alpha", "alpha-a1", vec!["a1".into()]).unwrap();
        }

        let repo = ready_repository(store.clone(), VbrmAutoCreate::Default, true);
        let managers = ids(&repo.backup_managers());
        assert!(managers.contains(&"DEFAULT-a1".to_string()));
        assert!(managers.contains(&"alpha-bro".to_string()));
        assert!(!managers.contains(&"alpha-a1".to_string()));
        assert!(store.load_managers().unwrap().iter().all(|m| m.id != "alpha-a1"));
    }
}
