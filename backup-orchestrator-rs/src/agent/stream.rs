//! Outbound command channel to one agent.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, Result};
use crate::protocol::{ActionKind, OrchestratorControl, RestoreInformation};

/// Fire-and-continue commands sent to an agent. Implementors only provide
/// [`send`](Self::send) and [`close`](Self::close).
pub trait AgentCommandSink: Send + Sync {
    fn send(&self, command: OrchestratorControl) -> Result<()>;

    fn close(&self);

    fn acknowledge_registration(&self) -> Result<()> {
        self.send(OrchestratorControl::RegisterAcknowledge {
            message: "Registered Agent".into(),
        })
    }

    fn reject_registration(&self, reason: &str) {
        if let Err(e) = self.send(OrchestratorControl::RegisterRejected { error: reason.to_string() }) {
            tracing::debug!("Could not deliver registration rejection: {e}");
        }
    }

    fn prepare_for_backup(&self, backup_name: &str, backup_manager_id: &str) -> Result<()> {
        self.send(OrchestratorControl::BackupPreparation {
            backup_name: backup_name.to_string(),
            backup_type: backup_manager_id.to_string(),
        })
    }

    fn prepare_for_restore(&self, restore_information: &RestoreInformation) -> Result<()> {
        self.send(OrchestratorControl::RestorePreparation(restore_information.clone()))
    }

    /// One message per fragment; the final one is flagged `last`.
    fn send_fragment_list(&self, restore_information: &RestoreInformation) -> Result<()> {
        let count = restore_information.fragments.len();
        for (i, fragment) in restore_information.fragments.iter().enumerate() {
            self.send(OrchestratorControl::FragmentListEntry {
                fragment: fragment.clone(),
                last: i + 1 == count,
            })?;
        }
        Ok(())
    }

    fn execute_backup(&self) -> Result<()> {
        self.send(OrchestratorControl::Execution { action: ActionKind::Backup })
    }

    fn execute_backup_post_action(&self) -> Result<()> {
        self.send(OrchestratorControl::PostActions { action: ActionKind::Backup })
    }

    fn execute_restore(&self) -> Result<()> {
        self.send(OrchestratorControl::Execution { action: ActionKind::Restore })
    }

    fn execute_restore_post_action(&self) -> Result<()> {
        self.send(OrchestratorControl::PostActions { action: ActionKind::Restore })
    }

    fn cancel_action(&self, action: ActionKind) -> Result<()> {
        self.send(OrchestratorControl::Cancel { action })
    }
}

/// Sink feeding the websocket writer task of one agent connection.
#[derive(Debug, Clone)]
pub struct WsAgentStream {
    tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

impl WsAgentStream {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            tx,
            closed: CancellationToken::new(),
        }
    }

    /// Cancelled once the orchestrator decides to drop the connection.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl AgentCommandSink for WsAgentStream {
    fn send(&self, command: OrchestratorControl) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(OrchestratorError::Transport("Agent connection is closed".into()));
        }
        let text = serde_json::to_string(&command).map_err(anyhow::Error::from)?;
        self.tx
            .send(text)
            .map_err(|_| OrchestratorError::Transport("Agent connection is closed".into()))
    }

    fn close(&self) {
        self.closed.cancel();
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::registration::SoftwareVersion;
    use crate::protocol::Fragment;

    fn restore_information(fragments: usize) -> RestoreInformation {
        RestoreInformation {
            backup_name: "b1".into(),
            backup_type: "DEFAULT".into(),
            software_version: SoftwareVersion::default(),
            fragments: (0..fragments)
                .map(|i| Fragment {
                    fragment_id: format!("f{i}"),
                    version: "1".into(),
                    size_in_bytes: "1".into(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_fragment_list_flags_last() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = WsAgentStream::new(tx);
        stream.send_fragment_list(&restore_information(3)).unwrap();

        let mut lasts = Vec::new();
        while let Ok(text) = rx.try_recv() {
            match serde_json::from_str::<OrchestratorControl>(&text).unwrap() {
                OrchestratorControl::FragmentListEntry { last, .. } => lasts.push(last),
                other => panic!("unexpected command {other:?}"),
            }
        }
        assert_eq!(lasts, [false, false, true]);
    }

    #[test]
    fn test_send_after_close_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let stream = WsAgentStream::new(tx);
        let closed = stream.closed();
        stream.close();

        assert!(closed.is_cancelled());
        assert!(matches!(stream.execute_backup(), Err(OrchestratorError::Transport(_))));
    }

    #[test]
    fn test_send_to_dropped_connection_fails() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let stream = WsAgentStream::new(tx);
        assert!(stream.cancel_action(ActionKind::Backup).is_err());
    }
}
