//! Persisted command definitions.
//!
//! A command is stored as one `commands` row plus one `command_args` /
//! `command_env` row per list element, keyed by `(command_id, idx)` so the
//! lists replay in their original order. Every function takes a bare
//! connection so callers can run it inside their own transaction.

use std::collections::HashMap;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::models::command::Command;
use crate::{AppError, Result};

/// Upper bound on rows per multi-row insert, well below `SQLite`'s bind limit.
const MAX_ROWS_PER_STATEMENT: usize = 500;

/// Internal row struct for argument / environment lookups.
#[derive(sqlx::FromRow)]
struct IndexedRow {
    command_id: String,
    value: String,
}

/// Insert a command definition for `group_name`.
///
/// Calling code is expected to roll back its transaction on error.
///
/// # Errors
///
/// Returns `AppError::Db` if any insert fails, including a duplicate
/// command identity.
pub async fn insert(conn: &mut SqliteConnection, group_name: &str, cmd: &Command) -> Result<()> {
    sqlx::query("INSERT INTO commands (command_id, group_name) VALUES (?1, ?2)")
        .bind(cmd.id())
        .bind(group_name)
        .execute(&mut *conn)
        .await?;

    insert_indexed(conn, "command_args", "arg", cmd.id(), cmd.args()).await?;
    insert_indexed(conn, "command_env", "env_var", cmd.id(), cmd.env()).await?;
    Ok(())
}

/// Batch-insert `(command_id, idx, value)` rows, one statement per chunk.
async fn insert_indexed(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    command_id: &str,
    values: &[String],
) -> Result<()> {
    let rows: Vec<(i64, &str)> = (0_i64..).zip(values.iter().map(String::as_str)).collect();

    for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {table} (command_id, idx, {column}) "));
        builder.push_values(chunk, |mut row, &(idx, value)| {
            row.push_bind(command_id).push_bind(idx).push_bind(value);
        });
        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

/// Load every command persisted for `group_name`, in insertion order.
///
/// # Errors
///
/// Returns `AppError::Db` if a query fails or a stored command has no
/// arguments.
pub async fn list_for_group(conn: &mut SqliteConnection, group_name: &str) -> Result<Vec<Command>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT command_id FROM commands WHERE group_name = ?1 ORDER BY rowid",
    )
    .bind(group_name)
    .fetch_all(&mut *conn)
    .await?;

    let mut args = fetch_indexed(
        conn,
        "SELECT a.command_id, a.arg AS value
         FROM command_args a JOIN commands c ON c.command_id = a.command_id
         WHERE c.group_name = ?1
         ORDER BY a.command_id, a.idx",
        group_name,
    )
    .await?;
    let mut env = fetch_indexed(
        conn,
        "SELECT e.command_id, e.env_var AS value
         FROM command_env e JOIN commands c ON c.command_id = e.command_id
         WHERE c.group_name = ?1
         ORDER BY e.command_id, e.idx",
        group_name,
    )
    .await?;

    ids.into_iter()
        .map(|id| {
            let cmd_args = args.remove(&id).unwrap_or_default();
            let cmd_env = env.remove(&id).unwrap_or_default();
            Command::with_id(id.clone(), cmd_args, cmd_env)
                .map_err(|err| AppError::Db(format!("corrupt command {id}: {err}")))
        })
        .collect()
}

async fn fetch_indexed(
    conn: &mut SqliteConnection,
    sql: &str,
    group_name: &str,
) -> Result<HashMap<String, Vec<String>>> {
    let rows: Vec<IndexedRow> = sqlx::query_as(sql)
        .bind(group_name)
        .fetch_all(&mut *conn)
        .await?;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        grouped.entry(row.command_id).or_default().push(row.value);
    }
    Ok(grouped)
}

/// Delete command definitions of `group_name`.
///
/// With an empty `command_ids` every command of the group is deleted.
/// Identities that do not belong to the group are ignored. Returns the
/// identities actually deleted, in insertion order.
///
/// # Errors
///
/// Returns `AppError::Db` if a query fails.
pub async fn delete(
    conn: &mut SqliteConnection,
    group_name: &str,
    command_ids: &[String],
) -> Result<Vec<String>> {
    let persisted: Vec<String> = sqlx::query_scalar(
        "SELECT command_id FROM commands WHERE group_name = ?1 ORDER BY rowid",
    )
    .bind(group_name)
    .fetch_all(&mut *conn)
    .await?;

    let targets: Vec<String> = if command_ids.is_empty() {
        persisted
    } else {
        persisted
            .into_iter()
            .filter(|id| command_ids.contains(id))
            .collect()
    };

    for id in &targets {
        sqlx::query("DELETE FROM command_args WHERE command_id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM command_env WHERE command_id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("DELETE FROM commands WHERE command_id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(targets)
}

/// Group that owns the persisted command `command_id`, if any.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn owner(conn: &mut SqliteConnection, command_id: &str) -> Result<Option<String>> {
    let owner: Option<String> =
        sqlx::query_scalar("SELECT group_name FROM commands WHERE command_id = ?1")
            .bind(command_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(owner)
}

/// Count the commands persisted for `group_name`.
///
/// # Errors
///
/// Returns `AppError::Db` if the query fails.
pub async fn count_for_group(conn: &mut SqliteConnection, group_name: &str) -> Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM commands WHERE group_name = ?1")
        .bind(group_name)
        .fetch_one(&mut *conn)
        .await?;
    u64::try_from(count).map_err(|err| AppError::Db(format!("invalid command count: {err}")))
}
