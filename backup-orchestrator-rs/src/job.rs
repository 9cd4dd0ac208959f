//! Contract the agent state machine needs from the job driving an action.
//!
//! Jobs own the multi-agent view of an action (which agents still have to
//! finish a stage, when to move to the next one). Agents only report to them.

use std::sync::Arc;

use crate::models::action::ActionType;
use crate::protocol::{ActionKind, RestoreInformation, StageComplete};

pub trait Job: Send + Sync {
    fn action_id(&self) -> String;

    fn action_type(&self) -> ActionType;

    fn backup_name(&self) -> String;

    /// Id of the backup manager that owns the action.
    fn backup_manager_id(&self) -> String;

    /// Backup manager id as agents know it. A vBRM reports its parent's id.
    fn agent_visible_backup_manager_id(&self) -> String;

    /// Name of the stage currently being executed.
    fn job_stage(&self) -> String;

    fn update_progress(&self, agent_id: &str, stage_complete: &StageComplete) -> anyhow::Result<()>;

    fn handle_agent_disconnecting(&self, agent_id: &str) -> anyhow::Result<()>;
}

pub trait RestoreJob: Job {
    fn create_restore_information(&self, agent_id: &str) -> anyhow::Result<RestoreInformation>;
}

impl std::fmt::Debug for dyn Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("action_id", &self.action_id()).finish()
    }
}

impl std::fmt::Debug for dyn RestoreJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoreJob").field("action_id", &self.action_id()).finish()
    }
}

/// The job an agent is participating in.
#[derive(Clone)]
pub enum JobHandle {
    Backup(Arc<dyn Job>),
    Restore(Arc<dyn RestoreJob>),
}

impl JobHandle {
    pub fn kind(&self) -> ActionKind {
        match self {
            JobHandle::Backup(_) => ActionKind::Backup,
            JobHandle::Restore(_) => ActionKind::Restore,
        }
    }

    pub fn action_id(&self) -> String {
        match self {
            JobHandle::Backup(job) => job.action_id(),
            JobHandle::Restore(job) => job.action_id(),
        }
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            JobHandle::Backup(job) => job.action_type(),
            JobHandle::Restore(job) => job.action_type(),
        }
    }

    pub fn backup_manager_id(&self) -> String {
        match self {
            JobHandle::Backup(job) => job.backup_manager_id(),
            JobHandle::Restore(job) => job.backup_manager_id(),
        }
    }

    pub fn job_stage(&self) -> String {
        match self {
            JobHandle::Backup(job) => job.job_stage(),
            JobHandle::Restore(job) => job.job_stage(),
        }
    }

    pub fn update_progress(&self, agent_id: &str, stage_complete: &StageComplete) -> anyhow::Result<()> {
        match self {
            JobHandle::Backup(job) => job.update_progress(agent_id, stage_complete),
            JobHandle::Restore(job) => job.update_progress(agent_id, stage_complete),
        }
    }

    pub fn handle_agent_disconnecting(&self, agent_id: &str) -> anyhow::Result<()> {
        match self {
            JobHandle::Backup(job) => job.handle_agent_disconnecting(agent_id),
            JobHandle::Restore(job) => job.handle_agent_disconnecting(agent_id),
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("kind", &self.kind())
            .field("action_id", &self.action_id())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Recording job used by the agent tests.

    use super::*;
    use crate::agent::registration::SoftwareVersion;
    use crate::protocol::Fragment;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum JobCall {
        UpdateProgress { agent_id: String, success: bool },
        Disconnected(String),
        RestoreInformation(String),
    }

    #[derive(Default)]
    pub struct RecordingJob {
        pub calls: Mutex<Vec<JobCall>>,
        pub fail_disconnect: bool,
        pub fail_progress: bool,
        pub fail_restore_information: bool,
    }

    impl RecordingJob {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn calls(&self) -> Vec<JobCall> {
            self.calls.lock().clone()
        }
    }

    impl Job for RecordingJob {
        fn action_id(&self) -> String {
            "11111".into()
        }

        fn action_type(&self) -> ActionType {
            ActionType::CreateBackup
        }

        fn backup_name(&self) -> String {
            "myBackup".into()
        }

        fn backup_manager_id(&self) -> String {
            "DEFAULT".into()
        }

        fn agent_visible_backup_manager_id(&self) -> String {
            "DEFAULT".into()
        }

        fn job_stage(&self) -> String {
            "EXECUTION".into()
        }

        fn update_progress(&self, agent_id: &str, stage_complete: &StageComplete) -> anyhow::Result<()> {
            self.calls.lock().push(JobCall::UpdateProgress {
                agent_id: agent_id.to_string(),
                success: stage_complete.success,
            });
            if self.fail_progress {
                anyhow::bail!("job rejected progress");
            }
            Ok(())
        }

        fn handle_agent_disconnecting(&self, agent_id: &str) -> anyhow::Result<()> {
            self.calls.lock().push(JobCall::Disconnected(agent_id.to_string()));
            if self.fail_disconnect {
                anyhow::bail!("job already finished");
            }
            Ok(())
        }
    }

    impl RestoreJob for RecordingJob {
        fn create_restore_information(&self, agent_id: &str) -> anyhow::Result<RestoreInformation> {
            self.calls.lock().push(JobCall::RestoreInformation(agent_id.to_string()));
            if self.fail_restore_information {
                anyhow::bail!("no restore information");
            }
            Ok(RestoreInformation {
                backup_name: self.backup_name(),
                backup_type: self.agent_visible_backup_manager_id(),
                software_version: SoftwareVersion::default(),
                fragments: vec![
                    Fragment { fragment_id: "f1".into(), version: "1".into(), size_in_bytes: "10".into() },
                    Fragment { fragment_id: "f2".into(), version: "1".into(), size_in_bytes: "20".into() },
                ],
            })
        }
    }
}
