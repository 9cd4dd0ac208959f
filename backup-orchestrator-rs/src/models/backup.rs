use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::agent::registration::SoftwareVersion;
use crate::models::action::Action;
use crate::models::action_lock::ActionLock;

// ── BackupStatus ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    Complete,
    Incomplete,
    Corrupted,
}

impl BackupStatus {
    /// Housekeeping removes higher values first.
    pub fn precedence(&self) -> u8 {
        match self {
            BackupStatus::Complete => 0,
            BackupStatus::Incomplete => 1,
            BackupStatus::Corrupted => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Complete => "COMPLETE",
            BackupStatus::Incomplete => "INCOMPLETE",
            BackupStatus::Corrupted => "CORRUPTED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "COMPLETE" => Some(BackupStatus::Complete),
            "INCOMPLETE" => Some(BackupStatus::Incomplete),
            "CORRUPTED" => Some(BackupStatus::Corrupted),
            _ => None,
        }
    }
}

// ── Backup ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub backup_manager_id: String,
    pub name: String,
    pub status: BackupStatus,
    pub creation_time: DateTime<Utc>,
    #[serde(default)]
    pub software_versions: Vec<SoftwareVersion>,
    /// Id of the action currently holding the backup, if any.
    #[serde(default, skip_deserializing)]
    pub locked_by: Option<String>,
}

#[derive(Debug)]
pub struct Backup {
    id: String,
    backup_manager_id: String,
    name: String,
    creation_time: DateTime<Utc>,
    status: RwLock<BackupStatus>,
    software_versions: RwLock<Vec<SoftwareVersion>>,
    lock: ActionLock,
}

impl Backup {
    /// A backup being created; it stays incomplete until the creating action succeeds.
    pub fn new(backup_manager_id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            backup_manager_id: backup_manager_id.into(),
            name,
            creation_time: Utc::now(),
            status: RwLock::new(BackupStatus::Incomplete),
            software_versions: RwLock::new(Vec::new()),
            lock: ActionLock::default(),
        }
    }

    pub fn from_record(record: BackupRecord) -> Self {
        Self {
            id: record.id,
            backup_manager_id: record.backup_manager_id,
            name: record.name,
            creation_time: record.creation_time,
            status: RwLock::new(record.status),
            software_versions: RwLock::new(record.software_versions),
            lock: ActionLock::default(),
        }
    }

    pub fn record(&self) -> BackupRecord {
        BackupRecord {
            id: self.id.clone(),
            backup_manager_id: self.backup_manager_id.clone(),
            name: self.name.clone(),
            status: self.status(),
            creation_time: self.creation_time,
            software_versions: self.software_versions.read().clone(),
            locked_by: self.lock.current().map(|a| a.id().to_string()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backup_manager_id(&self) -> &str {
        &self.backup_manager_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn status(&self) -> BackupStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: BackupStatus) {
        *self.status.write() = status;
    }

    pub fn add_software_version(&self, version: SoftwareVersion) {
        self.software_versions.write().push(version);
    }

    pub fn software_versions(&self) -> Vec<SoftwareVersion> {
        self.software_versions.read().clone()
    }

    /// Backups left incomplete by a previous run can never finish. Returns whether it changed.
    pub fn corrupt_if_incomplete(&self) -> bool {
        let mut status = self.status.write();
        if *status != BackupStatus::Incomplete {
            return false;
        }
        tracing::info!(backup_id = %self.id, backup_manager_id = %self.backup_manager_id, "Marking incomplete backup as corrupted");
        *status = BackupStatus::Corrupted;
        true
    }

    /// Orders backups so the first one is the next to remove: worst status first, then oldest.
    pub fn deletion_priority_cmp(&self, other: &Backup) -> Ordering {
        other
            .status()
            .precedence()
            .cmp(&self.status().precedence())
            .then_with(|| self.creation_time.cmp(&other.creation_time))
    }

    pub fn try_lock(&self, action: &Arc<Action>) -> bool {
        self.lock.try_lock(action)
    }

    pub fn unlock(&self, action: &Action) {
        self.lock.unlock(action)
    }

    pub fn locking_action(&self) -> Option<Arc<Action>> {
        self.lock.current()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::ActionType;
    use chrono::Duration;

    fn backup(name: &str, status: BackupStatus, age_days: i64) -> Backup {
        Backup::from_record(BackupRecord {
            id: name.into(),
            backup_manager_id: "DEFAULT".into(),
            name: name.into(),
            status,
            creation_time: Utc::now() - Duration::days(age_days),
            software_versions: Vec::new(),
            locked_by: None,
        })
    }

    #[test]
    fn test_deletion_order_worst_status_then_oldest() {
        let mut backups = vec![
            backup("complete-new", BackupStatus::Complete, 1),
            backup("incomplete", BackupStatus::Incomplete, 1),
            backup("complete-old", BackupStatus::Complete, 5),
            backup("corrupted", BackupStatus::Corrupted, 0),
        ];
        backups.sort_by(|a, b| a.deletion_priority_cmp(b));

        let names: Vec<&str> = backups.iter().map(|b| b.name()).collect();
        assert_eq!(names, ["corrupted", "incomplete", "complete-old", "complete-new"]);
    }

    #[test]
    fn test_corrupt_if_incomplete() {
        let b = Backup::new("DEFAULT", "b1");
        assert_eq!(b.status(), BackupStatus::Incomplete);
        assert!(b.corrupt_if_incomplete());
        assert_eq!(b.status(), BackupStatus::Corrupted);

        let done = backup("b2", BackupStatus::Complete, 0);
        assert!(!done.corrupt_if_incomplete());
        assert_eq!(done.status(), BackupStatus::Complete);
    }

    #[test]
    fn test_record_reports_lock_holder() {
        let b = Backup::new("DEFAULT", "b1");
        let action = Arc::new(Action::new("42", "DEFAULT", ActionType::Export, Some("b1".into())));

        assert!(b.try_lock(&action));
        assert_eq!(b.record().locked_by.as_deref(), Some("42"));

        b.unlock(&action);
        assert!(b.record().locked_by.is_none());
    }
}
