//! Append-only lifecycle event log backed by the `groups_log` table.
//!
//! Entries are never updated or deleted. Recovery derives the set of
//! active groups from the latest entry of each command.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::models::event::{GroupAction, LogEntry};
use crate::{AppError, Result};

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct LogRow {
    seq: i64,
    action_name: String,
    command_id: Option<String>,
    group_name: String,
    recorded_at: String,
}

impl LogRow {
    fn into_entry(self) -> Result<LogEntry> {
        let action = GroupAction::parse(&self.action_name)
            .ok_or_else(|| AppError::Db(format!("invalid action: {}", self.action_name)))?;
        let recorded_at = DateTime::parse_from_rfc3339(&self.recorded_at)
            .map_err(|e| AppError::Db(format!("invalid recorded_at: {e}")))?
            .with_timezone(&Utc);

        Ok(LogEntry {
            seq: self.seq,
            action,
            command_id: self.command_id,
            group_name: self.group_name,
            recorded_at,
        })
    }
}

/// Append an entry and return its sequence number.
///
/// # Errors
///
/// Returns `AppError::Db` if the insert fails.
pub async fn append(
    conn: &mut SqliteConnection,
    action: GroupAction,
    group_name: &str,
    command_id: Option<&str>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO groups_log (action_name, command_id, group_name, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(action.as_str())
    .bind(command_id)
    .bind(group_name)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// List every entry recorded for `group_name`, oldest first.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails or a row is malformed.
pub async fn list_for_group(conn: &mut SqliteConnection, group_name: &str) -> Result<Vec<LogEntry>> {
    let rows: Vec<LogRow> = sqlx::query_as(
        "SELECT seq, action_name, command_id, group_name, recorded_at
         FROM groups_log
         WHERE group_name = ?1
         ORDER BY seq ASC",
    )
    .bind(group_name)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(LogRow::into_entry).collect()
}

/// Names of groups with at least one command whose latest entry is
/// `command_started`, ordered by their earliest still-running command.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn active_groups(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT l.group_name
         FROM groups_log l
         JOIN (
             SELECT command_id, MAX(seq) AS last_seq
             FROM groups_log
             WHERE command_id IS NOT NULL
             GROUP BY command_id
         ) latest ON l.seq = latest.last_seq
         WHERE l.action_name = 'command_started'
         GROUP BY l.group_name
         ORDER BY MIN(l.seq)",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(names)
}

/// Names of every group that has ever been recorded, ordered by first entry.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn known_groups(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT group_name FROM groups_log GROUP BY group_name ORDER BY MIN(seq)",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(names)
}
