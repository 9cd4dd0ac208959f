use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ── ActionType ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    CreateBackup,
    DeleteBackup,
    Restore,
    Import,
    Export,
    Housekeeping,
    HousekeepingDeleteBackup,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::CreateBackup => "CREATE_BACKUP",
            ActionType::DeleteBackup => "DELETE_BACKUP",
            ActionType::Restore => "RESTORE",
            ActionType::Import => "IMPORT",
            ActionType::Export => "EXPORT",
            ActionType::Housekeeping => "HOUSEKEEPING",
            ActionType::HousekeepingDeleteBackup => "HOUSEKEEPING_DELETE_BACKUP",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let action_type = match raw {
            "CREATE_BACKUP" => ActionType::CreateBackup,
            "DELETE_BACKUP" => ActionType::DeleteBackup,
            "RESTORE" => ActionType::Restore,
            "IMPORT" => ActionType::Import,
            "EXPORT" => ActionType::Export,
            "HOUSEKEEPING" => ActionType::Housekeeping,
            "HOUSEKEEPING_DELETE_BACKUP" => ActionType::HousekeepingDeleteBackup,
            _ => return None,
        };
        Some(action_type)
    }

    pub fn is_housekeeping(&self) -> bool {
        matches!(self, ActionType::Housekeeping | ActionType::HousekeepingDeleteBackup)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ActionState / ResultType ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    NotAvailable,
    Success,
    Failure,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Running => "RUNNING",
            ActionState::Finished => "FINISHED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "RUNNING" => Some(ActionState::Running),
            "FINISHED" => Some(ActionState::Finished),
            _ => None,
        }
    }
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::NotAvailable => "NOT_AVAILABLE",
            ResultType::Success => "SUCCESS",
            ResultType::Failure => "FAILURE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NOT_AVAILABLE" => Some(ResultType::NotAvailable),
            "SUCCESS" => Some(ResultType::Success),
            "FAILURE" => Some(ResultType::Failure),
            _ => None,
        }
    }
}

// ── Action ──

/// Serializable view of an action, used by the store and the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub backup_manager_id: String,
    pub name: ActionType,
    pub backup_name: Option<String>,
    pub state: ActionState,
    pub result: ResultType,
    pub additional_info: Option<String>,
    pub start_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Progress {
    state: ActionState,
    result: ResultType,
    additional_info: Option<String>,
    completion_time: Option<DateTime<Utc>>,
}

/// One backup/restore/import/export/housekeeping operation of a backup manager.
#[derive(Debug)]
pub struct Action {
    id: String,
    backup_manager_id: String,
    action_type: ActionType,
    backup_name: Option<String>,
    start_time: DateTime<Utc>,
    progress: RwLock<Progress>,
}

impl Action {
    pub fn new(id: impl Into<String>, backup_manager_id: impl Into<String>, action_type: ActionType, backup_name: Option<String>) -> Self {
        Self {
            id: id.into(),
            backup_manager_id: backup_manager_id.into(),
            action_type,
            backup_name,
            start_time: Utc::now(),
            progress: RwLock::new(Progress {
                state: ActionState::Running,
                result: ResultType::NotAvailable,
                additional_info: None,
                completion_time: None,
            }),
        }
    }

    pub fn from_record(record: ActionRecord) -> Self {
        Self {
            id: record.id,
            backup_manager_id: record.backup_manager_id,
            action_type: record.name,
            backup_name: record.backup_name,
            start_time: record.start_time,
            progress: RwLock::new(Progress {
                state: record.state,
                result: record.result,
                additional_info: record.additional_info,
                completion_time: record.completion_time,
            }),
        }
    }

    pub fn record(&self) -> ActionRecord {
        let progress = self.progress.read();
        ActionRecord {
            id: self.id.clone(),
            backup_manager_id: self.backup_manager_id.clone(),
            name: self.action_type,
            backup_name: self.backup_name.clone(),
            state: progress.state,
            result: progress.result,
            additional_info: progress.additional_info.clone(),
            start_time: self.start_time,
            completion_time: progress.completion_time,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backup_manager_id(&self) -> &str {
        &self.backup_manager_id
    }

    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    pub fn backup_name(&self) -> Option<&str> {
        self.backup_name.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        self.progress.read().completion_time
    }

    pub fn state(&self) -> ActionState {
        self.progress.read().state
    }

    pub fn result(&self) -> ResultType {
        self.progress.read().result
    }

    pub fn is_running(&self) -> bool {
        self.state() == ActionState::Running
    }

    pub fn is_completed(&self) -> bool {
        self.state() == ActionState::Finished
    }

    pub fn finish(&self, result: ResultType, additional_info: Option<String>) {
        let mut progress = self.progress.write();
        progress.state = ActionState::Finished;
        progress.result = result;
        progress.additional_info = additional_info;
        progress.completion_time = Some(Utc::now());
    }

    /// Marks an action left running by a previous process as failed. Returns whether it changed.
    pub fn fail_if_running(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        tracing::info!(action_id = %self.id, backup_manager_id = %self.backup_manager_id, "Failing action left running by previous run");
        self.finish(
            ResultType::Failure,
            Some("Action was running when the orchestrator restarted".into()),
        );
        true
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.backup_manager_id == other.backup_manager_id
            && self.action_type == other.action_type
            && self.id == other.id
    }
}

impl Eq for Action {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_instance() {
        let a = Action::new("1", "DEFAULT", ActionType::CreateBackup, Some("b".into()));
        let b = Action::new("1", "DEFAULT", ActionType::CreateBackup, None);
        let c = Action::new("1", "other", ActionType::CreateBackup, None);
        let d = Action::new("1", "DEFAULT", ActionType::Restore, None);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_fail_if_running() {
        let action = Action::new("7", "DEFAULT", ActionType::Import, None);
        assert!(action.fail_if_running());
        assert_eq!(action.state(), ActionState::Finished);
        assert_eq!(action.result(), ResultType::Failure);
        assert!(action.completion_time().is_some());

        assert!(!action.fail_if_running());
    }

    #[test]
    fn test_record_keeps_progress() {
        let action = Action::new("9", "DEFAULT", ActionType::Export, Some("b1".into()));
        action.finish(ResultType::Success, None);

        let restored = Action::from_record(action.record());
        assert_eq!(restored, action);
        assert_eq!(restored.result(), ResultType::Success);
        assert_eq!(restored.backup_name(), Some("b1"));
    }

    #[test]
    fn test_type_names_round_trip() {
        for t in [ActionType::CreateBackup, ActionType::HousekeepingDeleteBackup] {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(serde_json::to_string(&ActionType::DeleteBackup).unwrap(), "\"DELETE_BACKUP\"");
        assert!(ActionType::HousekeepingDeleteBackup.is_housekeeping());
        assert!(!ActionType::Restore.is_housekeeping());
    }
}
