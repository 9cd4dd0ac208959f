//! Messages exchanged with agents.
//!
//! Agents send [`AgentControl`] messages; the orchestrator answers with
//! [`OrchestratorControl`] commands. Both travel as JSON text frames over the
//! agent websocket.

use serde::{Deserialize, Serialize};

use crate::agent::registration::SoftwareVersion;

/// The kind of action a protocol message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Register,
    Backup,
    Restore,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::Register => "REGISTER",
            ActionKind::Backup => "BACKUP",
            ActionKind::Restore => "RESTORE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentMessageType {
    Register,
    StageComplete,
    /// Any other message type; tolerated and ignored by the state machine.
    Other(String),
}

impl From<String> for AgentMessageType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "REGISTER" => AgentMessageType::Register,
            "STAGE_COMPLETE" => AgentMessageType::StageComplete,
            _ => AgentMessageType::Other(raw),
        }
    }
}

impl From<AgentMessageType> for String {
    fn from(kind: AgentMessageType) -> Self {
        match kind {
            AgentMessageType::Register => "REGISTER".to_string(),
            AgentMessageType::StageComplete => "STAGE_COMPLETE".to_string(),
            AgentMessageType::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageComplete {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SoftwareVersionInfo {
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub product_number: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub production_date: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub semantic_version: String,
    #[serde(default)]
    pub commercial_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub software_version_info: SoftwareVersionInfo,
}

/// A message sent by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentControl {
    pub action: ActionKind,
    pub agent_message_type: AgentMessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_complete: Option<StageComplete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<Register>,
}

impl AgentControl {
    pub fn register(register: Register) -> Self {
        Self {
            action: ActionKind::Register,
            agent_message_type: AgentMessageType::Register,
            stage_complete: None,
            register: Some(register),
        }
    }

    pub fn stage_complete(action: ActionKind, success: bool, message: impl Into<String>) -> Self {
        Self {
            action,
            agent_message_type: AgentMessageType::StageComplete,
            stage_complete: Some(StageComplete { success, message: message.into() }),
            register: None,
        }
    }

    pub fn is_registration(&self) -> bool {
        self.action == ActionKind::Register
            && self.agent_message_type == AgentMessageType::Register
            && self.register.is_some()
    }

    /// Returns the stage-complete payload if this message completes a stage of `action`.
    pub fn stage_complete_for(&self, action: ActionKind) -> Option<&StageComplete> {
        if self.action == action && self.agent_message_type == AgentMessageType::StageComplete {
            self.stage_complete.as_ref()
        } else {
            None
        }
    }

    /// Stage complete for any action, used while an agent is cancelling.
    pub fn any_stage_complete(&self) -> Option<&StageComplete> {
        if self.agent_message_type == AgentMessageType::StageComplete {
            self.stage_complete.as_ref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub fragment_id: String,
    pub version: String,
    pub size_in_bytes: String,
}

/// Everything an agent needs to restore its part of a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreInformation {
    pub backup_name: String,
    pub backup_type: String,
    pub software_version: SoftwareVersion,
    #[serde(default)]
    pub fragments: Vec<Fragment>,
}

/// A command sent to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum OrchestratorControl {
    #[serde(rename = "register:ack")]
    RegisterAcknowledge { message: String },

    #[serde(rename = "register:error")]
    RegisterRejected { error: String },

    #[serde(rename = "backup:preparation")]
    BackupPreparation { backup_name: String, backup_type: String },

    #[serde(rename = "restore:preparation")]
    RestorePreparation(RestoreInformation),

    #[serde(rename = "restore:fragment")]
    FragmentListEntry { fragment: Fragment, last: bool },

    #[serde(rename = "execution")]
    Execution { action: ActionKind },

    #[serde(rename = "post_actions")]
    PostActions { action: ActionKind },

    #[serde(rename = "cancel")]
    Cancel { action: ActionKind },
}
