//! Registry of named process groups backed by `SQLite`.
//!
//! Every lifecycle transition runs inside one transaction: the event log
//! and command definitions are written alongside the live mutation, and
//! the transaction is rolled back if any step fails. Process side effects
//! are not compensated by a rollback: if the third command of a `create`
//! fails to launch, the first two keep running unsupervised.
//!
//! The name → group map is guarded by a reader/writer lock that is held
//! only for lookups and inserts, never across a process wait or I/O.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::capture::{LogLines, OutputCapture, OutputStream};
use crate::config::GlobalConfig;
use crate::models::command::{validate_command_id, Command};
use crate::models::event::{GroupAction, LogEntry};
use crate::persistence::{command_repo, db, event_log};
use crate::supervisor::group::{Group, ProcessInfo};
use crate::supervisor::Signal;
use crate::{AppError, Result};

/// Owner of every live [`Group`], keyed by name.
#[derive(Debug)]
pub struct Groups {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    db: Arc<SqlitePool>,
    capture: OutputCapture,
    config: GlobalConfig,
}

impl Groups {
    /// Open the registry stored under `config.root`.
    ///
    /// Creates the root directory and the database file when missing. No
    /// group is started; call [`Groups::recover`] to resume active groups.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an invalid configuration,
    /// `AppError::Io` if the root cannot be created, or `AppError::Db` if
    /// the database cannot be opened.
    pub async fn connect(mut config: GlobalConfig) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.root).await.map_err(|err| {
            AppError::Io(format!("creating {} directory: {err}", config.root.display()))
        })?;
        config.root = tokio::fs::canonicalize(&config.root).await?;

        let pool = db::connect(&config.db_path()).await?;
        info!(root = %config.root.display(), "group registry opened");
        Ok(Self::with_pool(config, pool))
    }

    /// Build a registry over an already connected pool.
    ///
    /// Capture files are written under `config.root`, which must exist.
    #[must_use]
    pub fn with_pool(config: GlobalConfig, pool: SqlitePool) -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
            db: Arc::new(pool),
            capture: OutputCapture::new(config.root.clone()),
            config,
        }
    }

    /// Shared database pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<SqlitePool> {
        &self.db
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Create the group `name` and start every command in `cmds`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the group is live or already has
    /// persisted commands, or if a command identity is already owned by a
    /// group (this one included), and otherwise the first persistence or
    /// launch failure. On failure nothing is persisted and the group is not
    /// registered, but processes started before the failure keep running.
    #[instrument(skip(self, cmds), fields(commands = cmds.len()))]
    pub async fn create(&self, name: &str, cmds: Vec<Command>) -> Result<()> {
        let group = self.reserve(name).await?;

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                self.release(name, &group).await;
                return Err(err.into());
            }
        };
        if let Err(err) = self.create_tx(&mut tx, name, &group, cmds).await {
            self.release(name, &group).await;
            rollback(tx).await;
            return Err(err);
        }
        if let Err(err) = tx.commit().await {
            self.release(name, &group).await;
            return Err(AppError::Db(format!("committing transaction: {err}")));
        }

        info!(group = name, "group created");
        Ok(())
    }

    async fn create_tx(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
        group: &Group,
        cmds: Vec<Command>,
    ) -> Result<()> {
        if command_repo::count_for_group(conn, name).await? > 0 {
            return Err(AppError::Conflict(format!(
                "group {name} already has persisted commands; open it instead"
            )));
        }

        event_log::append(conn, GroupAction::GroupCreated, name, None).await?;
        for cmd in cmds {
            if let Some(owner) = command_repo::owner(conn, cmd.id()).await? {
                return Err(AppError::Conflict(format!(
                    "command {} already belongs to group {owner}",
                    cmd.id()
                )));
            }
            command_repo::insert(conn, name, &cmd).await?;
            let command_id = cmd.id().to_owned();
            group.start(cmd).await?;
            event_log::append(conn, GroupAction::CommandStarted, name, Some(&command_id)).await?;
        }
        Ok(())
    }

    /// Start every command persisted for `name` in a fresh group.
    ///
    /// A name with no persisted commands yields an empty live group.
    /// Returns the commands that were started, in definition order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the group is already live, and
    /// otherwise the first persistence or launch failure, with the same
    /// rollback semantics as [`Groups::create`].
    #[instrument(skip(self))]
    pub async fn open(&self, name: &str) -> Result<Vec<Command>> {
        let group = self.reserve(name).await?;

        let mut tx = match self.db.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                self.release(name, &group).await;
                return Err(err.into());
            }
        };
        let cmds = match open_tx(&mut tx, name, &group).await {
            Ok(cmds) => cmds,
            Err(err) => {
                self.release(name, &group).await;
                rollback(tx).await;
                return Err(err);
            }
        };
        if let Err(err) = tx.commit().await {
            self.release(name, &group).await;
            return Err(AppError::Db(format!("committing transaction: {err}")));
        }

        info!(group = name, commands = cmds.len(), "group opened");
        Ok(cmds)
    }

    /// Stop every process of `name` and discard the live group.
    ///
    /// The persisted definitions stay, so the group can be opened again.
    /// Closing a group that is not live succeeds.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the stop events cannot be recorded (nothing
    /// is killed then), or the first teardown failure such as
    /// `AppError::WaitTimeout`. The group is discarded in the latter case.
    #[instrument(skip(self))]
    pub async fn close(&self, name: &str) -> Result<()> {
        let Some(group) = self.group(name).await else {
            return Ok(());
        };

        let mut tx = self.db.begin().await?;
        if let Err(err) = record_stopped(&mut tx, name, &group.processes().await).await {
            rollback(tx).await;
            return Err(err);
        }

        let teardown = group.shutdown(self.config.close_grace()).await;
        self.release(name, &group).await;
        tx.commit()
            .await
            .map_err(|err| AppError::Db(format!("committing transaction: {err}")))?;

        info!(group = name, "group closed");
        teardown
    }

    /// Delete `command_ids` (every command when empty) from `name`, both
    /// durably and in the live group.
    ///
    /// The live group stays registered, even when emptied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `name` is not live, `AppError::Db` if
    /// the deletion cannot be recorded (nothing is killed then), or the
    /// first teardown failure.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str, command_ids: &[String]) -> Result<()> {
        let group = self.require(name).await?;

        let mut tx = self.db.begin().await?;
        if let Err(err) = remove_tx(&mut tx, name, &group, command_ids).await {
            rollback(tx).await;
            return Err(err);
        }

        let teardown = group.remove(command_ids).await;
        tx.commit()
            .await
            .map_err(|err| AppError::Db(format!("committing transaction: {err}")))?;
        teardown
    }

    /// Deliver `signal` to every running process of `name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `name` is not live, or
    /// `AppError::Signal` on the first failed delivery.
    pub async fn signal(&self, name: &str, signal: Signal) -> Result<()> {
        self.require(name).await?.signal(signal).await
    }

    /// Wait for every process of `name`, bounded by the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `name` is not live, otherwise the
    /// result of [`Group::wait`].
    pub async fn wait(&self, name: &str) -> Result<()> {
        let group = self.require(name).await?;
        group.wait(self.config.wait_timeout()).await
    }

    /// Commands of the live group `name`, or `None` when it is not live.
    pub async fn commands(&self, name: &str) -> Option<Vec<Command>> {
        match self.group(name).await {
            Some(group) => Some(group.commands().await),
            None => None,
        }
    }

    /// Processes of the live group `name`, or `None` when it is not live.
    pub async fn processes(&self, name: &str) -> Option<Vec<ProcessInfo>> {
        match self.group(name).await {
            Some(group) => Some(group.processes().await),
            None => None,
        }
    }

    /// Names of the live groups, sorted.
    pub async fn live_groups(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Open a line reader over a command's captured output.
    ///
    /// The caller owns the returned reader; dropping it releases the file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` for an identity that is not a
    /// plain file name, `AppError::NotFound` if nothing was captured.
    pub async fn logs(&self, command_id: &str, stream: OutputStream) -> Result<LogLines> {
        validate_command_id(command_id)?;
        self.capture.open(command_id, stream).await
    }

    /// Event log entries recorded for `name`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn events(&self, name: &str) -> Result<Vec<LogEntry>> {
        let mut conn = self.db.acquire().await?;
        event_log::list_for_group(&mut conn, name).await
    }

    /// Names of every group ever recorded, in order of first appearance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn known_groups(&self) -> Result<Vec<String>> {
        let mut conn = self.db.acquire().await?;
        event_log::known_groups(&mut conn).await
    }

    /// Reopen every group the event log shows as still running.
    ///
    /// Groups that are already live are skipped. A group that fails to
    /// reopen is logged and skipped. Returns the names reopened.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the event log cannot be read.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<Vec<String>> {
        let active = {
            let mut conn = self.db.acquire().await?;
            event_log::active_groups(&mut conn).await?
        };

        let mut recovered = Vec::with_capacity(active.len());
        for name in active {
            if self.group(&name).await.is_some() {
                continue;
            }
            match self.open(&name).await {
                Ok(cmds) => {
                    info!(group = name, commands = cmds.len(), "group recovered");
                    recovered.push(name);
                }
                Err(err) => warn!(group = name, %err, "failed to recover group"),
            }
        }
        Ok(recovered)
    }

    async fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().await.get(name).cloned()
    }

    async fn require(&self, name: &str) -> Result<Arc<Group>> {
        self.group(name)
            .await
            .ok_or_else(|| AppError::NotFound(format!("group {name} not found")))
    }

    /// Register a fresh, empty group under `name`.
    async fn reserve(&self, name: &str) -> Result<Arc<Group>> {
        if name.is_empty() {
            return Err(AppError::InvalidArgument("group name must not be empty".into()));
        }
        let mut groups = self.groups.write().await;
        if groups.contains_key(name) {
            return Err(AppError::Conflict(format!("group {name} is already open")));
        }
        let group = Arc::new(Group::new(
            name,
            self.capture.clone(),
            self.config.stop_grace(),
        ));
        groups.insert(name.to_owned(), Arc::clone(&group));
        Ok(group)
    }

    /// Drop `group` from the map if it is still the one registered.
    async fn release(&self, name: &str, group: &Arc<Group>) {
        let mut groups = self.groups.write().await;
        if groups.get(name).is_some_and(|live| Arc::ptr_eq(live, group)) {
            groups.remove(name);
        }
    }
}

async fn open_tx(conn: &mut SqliteConnection, name: &str, group: &Group) -> Result<Vec<Command>> {
    let cmds = command_repo::list_for_group(conn, name).await?;
    for cmd in &cmds {
        group.start(cmd.clone()).await?;
        event_log::append(conn, GroupAction::CommandStarted, name, Some(cmd.id())).await?;
    }
    Ok(cmds)
}

async fn remove_tx(
    conn: &mut SqliteConnection,
    name: &str,
    group: &Group,
    command_ids: &[String],
) -> Result<()> {
    command_repo::delete(conn, name, command_ids).await?;

    let targets: Vec<ProcessInfo> = group
        .processes()
        .await
        .into_iter()
        .filter(|p| command_ids.is_empty() || command_ids.iter().any(|id| id == p.command.id()))
        .collect();
    record_stopped(conn, name, &targets).await?;

    if command_ids.is_empty() {
        event_log::append(conn, GroupAction::GroupRemoved, name, None).await?;
    }
    Ok(())
}

async fn record_stopped(
    conn: &mut SqliteConnection,
    name: &str,
    processes: &[ProcessInfo],
) -> Result<()> {
    for process in processes {
        event_log::append(
            conn,
            GroupAction::CommandStopped,
            name,
            Some(process.command.id()),
        )
        .await?;
    }
    Ok(())
}

async fn rollback(tx: Transaction<'_, Sqlite>) {
    if let Err(err) = tx.rollback().await {
        warn!(%err, "transaction rollback failed");
    }
}
