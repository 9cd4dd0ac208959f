//! Persistence of backup managers, their backups and their actions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::connection::{create_memory_pool, DbPool};
use crate::db::migrate::migrate;
use crate::models::action::{ActionRecord, ActionState, ActionType, ResultType};
use crate::models::backup::{BackupRecord, BackupStatus};

/// What the backup manager layer needs from storage.
pub trait ManagerStore: Send + Sync {
    fn load_managers(&self) -> anyhow::Result<Vec<ManagerRecord>>;
    fn save_manager(&self, manager: &ManagerRecord) -> anyhow::Result<()>;
    /// Removes a manager together with its backups and actions.
    fn delete_manager(&self, id: &str) -> anyhow::Result<()>;

    fn load_backups(&self, backup_manager_id: &str) -> anyhow::Result<Vec<BackupRecord>>;
    fn save_backup(&self, backup: &BackupRecord) -> anyhow::Result<()>;
    fn delete_backup(&self, backup_manager_id: &str, backup_id: &str) -> anyhow::Result<()>;

    fn load_actions(&self, backup_manager_id: &str) -> anyhow::Result<Vec<ActionRecord>>;
    fn save_action(&self, action: &ActionRecord) -> anyhow::Result<()>;
    fn delete_action(&self, backup_manager_id: &str, action_id: &str) -> anyhow::Result<()>;
}

// ── ManagerRecord ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub id: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub agent_ids: Vec<String>,
}

fn row_to_manager(row: &Row) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get("id")?, row.get("parent_id")?, row.get("agent_ids")?))
}

// ── Row helpers ──

fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn parse_enum<T>(raw: &str, parse: fn(&str) -> Option<T>, what: &str) -> anyhow::Result<T> {
    parse(raw).ok_or_else(|| anyhow::anyhow!("Unknown {what} <{raw}> in database"))
}

struct BackupRow {
    id: String,
    backup_manager_id: String,
    name: String,
    status: String,
    creation_time: String,
    software_versions: String,
}

fn row_to_backup(row: &Row) -> rusqlite::Result<BackupRow> {
    Ok(BackupRow {
        id: row.get("id")?,
        backup_manager_id: row.get("backup_manager_id")?,
        name: row.get("name")?,
        status: row.get("status")?,
        creation_time: row.get("creation_time")?,
        software_versions: row.get("software_versions")?,
    })
}

impl BackupRow {
    fn into_record(self) -> anyhow::Result<BackupRecord> {
        Ok(BackupRecord {
            id: self.id,
            backup_manager_id: self.backup_manager_id,
            name: self.name,
            status: parse_enum(&self.status, BackupStatus::parse, "backup status")?,
            creation_time: parse_time(&self.creation_time)?,
            software_versions: serde_json::from_str(&self.software_versions)?,
            locked_by: None,
        })
    }
}

struct ActionRow {
    id: String,
    backup_manager_id: String,
    name: String,
    backup_name: Option<String>,
    state: String,
    result: String,
    additional_info: Option<String>,
    start_time: String,
    completion_time: Option<String>,
}

fn row_to_action(row: &Row) -> rusqlite::Result<ActionRow> {
    Ok(ActionRow {
        id: row.get("id")?,
        backup_manager_id: row.get("backup_manager_id")?,
        name: row.get("name")?,
        backup_name: row.get("backup_name")?,
        state: row.get("state")?,
        result: row.get("result")?,
        additional_info: row.get("additional_info")?,
        start_time: row.get("start_time")?,
        completion_time: row.get("completion_time")?,
    })
}

impl ActionRow {
    fn into_record(self) -> anyhow::Result<ActionRecord> {
        Ok(ActionRecord {
            id: self.id,
            backup_manager_id: self.backup_manager_id,
            name: parse_enum(&self.name, ActionType::parse, "action type")?,
            backup_name: self.backup_name,
            state: parse_enum(&self.state, ActionState::parse, "action state")?,
            result: parse_enum(&self.result, ResultType::parse, "action result")?,
            additional_info: self.additional_info,
            start_time: parse_time(&self.start_time)?,
            completion_time: self.completion_time.as_deref().map(parse_time).transpose()?,
        })
    }
}

// ── SqliteStore ──

pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Wraps a pool, migrating the schema first.
    pub fn new(pool: DbPool) -> anyhow::Result<Self> {
        migrate(&pool)?;
        Ok(Self { pool })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::new(create_memory_pool()?)
    }

    fn conn(&self) -> anyhow::Result<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }
}

fn manager_exists(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM backup_managers WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

impl ManagerStore for SqliteStore {
    fn load_managers(&self) -> anyhow::Result<Vec<ManagerRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, parent_id, agent_ids FROM backup_managers ORDER BY created_at, id")?;
        let rows = stmt.query_map([], row_to_manager)?;
        let mut managers = Vec::new();
        for row in rows {
            let (id, parent_id, agent_ids) = row?;
            managers.push(ManagerRecord {
                id,
                parent_id,
                agent_ids: serde_json::from_str(&agent_ids)?,
            });
        }
        Ok(managers)
    }

    fn save_manager(&self, manager: &ManagerRecord) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backup_managers (id, parent_id, agent_ids) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET parent_id = excluded.parent_id, agent_ids = excluded.agent_ids",
            params![manager.id, manager.parent_id, serde_json::to_string(&manager.agent_ids)?],
        )?;
        Ok(())
    }

    fn delete_manager(&self, id: &str) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM backup_managers WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn load_backups(&self, backup_manager_id: &str) -> anyhow::Result<Vec<BackupRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM backups WHERE backup_manager_id = ?1 ORDER BY creation_time",
        )?;
        let rows = stmt.query_map(params![backup_manager_id], row_to_backup)?;
        rows.map(|row| row?.into_record()).collect()
    }

    fn save_backup(&self, backup: &BackupRecord) -> anyhow::Result<()> {
        let conn = self.conn()?;
        if !manager_exists(&conn, &backup.backup_manager_id)? {
            anyhow::bail!("Backup manager <{}> is not persisted", backup.backup_manager_id);
        }
        conn.execute(
            "INSERT INTO backups (id, backup_manager_id, name, status, creation_time, software_versions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(backup_manager_id, id) DO UPDATE SET
               name = excluded.name, status = excluded.status, software_versions = excluded.software_versions",
            params![
                backup.id,
                backup.backup_manager_id,
                backup.name,
                backup.status.as_str(),
                backup.creation_time.to_rfc3339(),
                serde_json::to_string(&backup.software_versions)?,
            ],
        )?;
        Ok(())
    }

    fn delete_backup(&self, backup_manager_id: &str, backup_id: &str) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM backups WHERE backup_manager_id = ?1 AND id = ?2",
            params![backup_manager_id, backup_id],
        )?;
        Ok(())
    }

    fn load_actions(&self, backup_manager_id: &str) -> anyhow::Result<Vec<ActionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM actions WHERE backup_manager_id = ?1 ORDER BY start_time",
        )?;
        let rows = stmt.query_map(params![backup_manager_id], row_to_action)?;
        rows.map(|row| row?.into_record()).collect()
    }

    fn save_action(&self, action: &ActionRecord) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO actions (id, backup_manager_id, name, backup_name, state, result, additional_info, start_time, completion_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(backup_manager_id, id) DO UPDATE SET
               state = excluded.state, result = excluded.result,
               additional_info = excluded.additional_info, completion_time = excluded.completion_time",
            params![
                action.id,
                action.backup_manager_id,
                action.name.as_str(),
                action.backup_name,
                action.state.as_str(),
                action.result.as_str(),
                action.additional_info,
                action.start_time.to_rfc3339(),
                action.completion_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn delete_action(&self, backup_manager_id: &str, action_id: &str) -> anyhow::Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM actions WHERE backup_manager_id = ?1 AND id = ?2",
            params![backup_manager_id, action_id],
        )?;
        Ok(())
    }
}
