use crate::db::connection::DbPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS backup_managers (
  id TEXT PRIMARY KEY,
  parent_id TEXT NOT NULL DEFAULT '',
  agent_ids TEXT NOT NULL DEFAULT '[]',
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS backups (
  id TEXT NOT NULL,
  backup_manager_id TEXT NOT NULL REFERENCES backup_managers(id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  status TEXT NOT NULL CHECK(status IN ('COMPLETE','INCOMPLETE','CORRUPTED')),
  creation_time TEXT NOT NULL,
  software_versions TEXT NOT NULL DEFAULT '[]',
  PRIMARY KEY (backup_manager_id, id)
);

CREATE TABLE IF NOT EXISTS actions (
  id TEXT NOT NULL,
  backup_manager_id TEXT NOT NULL REFERENCES backup_managers(id) ON DELETE CASCADE,
  name TEXT NOT NULL,
  backup_name TEXT,
  state TEXT NOT NULL CHECK(state IN ('RUNNING','FINISHED')),
  result TEXT NOT NULL CHECK(result IN ('NOT_AVAILABLE','SUCCESS','FAILURE')),
  additional_info TEXT,
  start_time TEXT NOT NULL,
  completion_time TEXT,
  PRIMARY KEY (backup_manager_id, id)
);

CREATE INDEX IF NOT EXISTS idx_backups_manager ON backups(backup_manager_id);
CREATE INDEX IF NOT EXISTS idx_actions_manager ON actions(backup_manager_id);
"#;

pub fn migrate(pool: &DbPool) -> anyhow::Result<()> {
    tracing::info!("[DB] Starting database migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}
