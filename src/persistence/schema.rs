//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS`, so the bootstrap
//! runs on every startup against an existing root.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS commands (
    command_id      TEXT PRIMARY KEY NOT NULL,
    group_name      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS command_args (
    command_id      TEXT NOT NULL,
    idx             INTEGER NOT NULL,
    arg             TEXT NOT NULL,
    PRIMARY KEY (command_id, idx)
);

CREATE TABLE IF NOT EXISTS command_env (
    command_id      TEXT NOT NULL,
    idx             INTEGER NOT NULL,
    env_var         TEXT NOT NULL,
    PRIMARY KEY (command_id, idx)
);

CREATE TABLE IF NOT EXISTS groups_log (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    action_name     TEXT NOT NULL CHECK(action_name IN ('group_created','command_started','command_stopped','group_removed')),
    command_id      TEXT,
    group_name      TEXT NOT NULL,
    recorded_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_commands_group ON commands(group_name);
CREATE INDEX IF NOT EXISTS idx_groups_log_group ON groups_log(group_name);
CREATE INDEX IF NOT EXISTS idx_groups_log_command ON groups_log(command_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
