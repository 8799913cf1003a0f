//! In-memory supervisor for one named set of processes.
//!
//! Each started process gets a dedicated observer task that owns the child
//! handle. The observer publishes on a `watch` channel twice: once as soon
//! as the child is reaped, and once more with the final outcome after the
//! capture copies have drained. Signals and kills key off the first, `wait`
//! off the second. The member entry keeps that receiver until the process
//! is de-registered, so `wait` accounts for processes that finished before
//! it was called.
//!
//! Members are de-registered by a per-group key, never by pid, since a pid
//! may be reused once its process is reaped. De-registration is idempotent:
//! removing a member whose observer already reported completion, or
//! removing it twice, leaves the same state.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::stream::{FuturesUnordered, StreamExt};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::capture::{CaptureHandles, OutputCapture};
use crate::models::command::Command;
use crate::{AppError, Result};

/// Time allowed for capture copies to reach end-of-stream after exit.
const CAPTURE_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exited with status zero.
    Success,
    /// Killed by the supervisor through `stop`, `remove` or `shutdown`.
    Terminated,
    /// Exited unsuccessfully, or could not be waited on.
    Failed(String),
}

/// Snapshot of one registered process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Command the process was started from.
    pub command: Command,
    /// OS process identifier.
    pub pid: u32,
    /// Outcome, once the observer has reported one.
    pub outcome: Option<Outcome>,
}

/// Observer progress for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Progress {
    Running,
    /// Reaped; capture copies may still be draining.
    Reaped,
    Done(Outcome),
}

impl Progress {
    fn is_reaped(&self) -> bool {
        !matches!(self, Self::Running)
    }

    fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Done(outcome) => Some(outcome.clone()),
            Self::Running | Self::Reaped => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Member {
    key: u64,
    command: Command,
    pid: u32,
    terminated: Arc<AtomicBool>,
    progress: watch::Receiver<Progress>,
}

impl Member {
    fn has_exited(&self) -> bool {
        self.progress.borrow().is_reaped()
    }
}

/// A named set of concurrently running processes.
#[derive(Debug)]
pub struct Group {
    name: String,
    capture: OutputCapture,
    stop_grace: Duration,
    next_key: AtomicU64,
    members: Mutex<Vec<Member>>,
}

impl Group {
    /// Create an empty group writing capture files through `capture`.
    ///
    /// `stop_grace` bounds how long `stop` and `remove` wait for a killed
    /// process to be reaped.
    #[must_use]
    pub fn new(name: impl Into<String>, capture: OutputCapture, stop_grace: Duration) -> Self {
        Self {
            name: name.into(),
            capture,
            stop_grace,
            next_key: AtomicU64::new(0),
            members: Mutex::new(Vec::new()),
        }
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start `cmd`, wire its output capture and register it.
    ///
    /// Returns the new process id without waiting for the process.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the capture files cannot be created and
    /// `AppError::Launch` if the OS refuses to start the process. Nothing is
    /// registered in either case.
    pub async fn start(&self, cmd: Command) -> Result<u32> {
        let files = self.capture.prepare(cmd.id()).await?;

        let mut child = build_process(&cmd)
            .spawn()
            .map_err(|err| AppError::Launch(format!("starting {}: {err}", cmd.program())))?;

        let (Some(pid), Some(stdout), Some(stderr)) =
            (child.id(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return Err(AppError::Launch(format!(
                "starting {}: process handle incomplete",
                cmd.program()
            )));
        };
        let capture = files.attach(stdout, stderr);

        let terminated = Arc::new(AtomicBool::new(false));
        let (tx, rx) = watch::channel(Progress::Running);
        tokio::spawn(observe(
            self.name.clone(),
            cmd.id().to_owned(),
            child,
            capture,
            Arc::clone(&terminated),
            tx,
        ));

        info!(group = self.name, command_id = cmd.id(), pid, "process started");
        self.register(cmd, pid, terminated, rx).await;
        Ok(pid)
    }

    async fn register(
        &self,
        command: Command,
        pid: u32,
        terminated: Arc<AtomicBool>,
        progress: watch::Receiver<Progress>,
    ) {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.members.lock().await.push(Member {
            key,
            command,
            pid,
            terminated,
            progress,
        });
    }

    /// Deliver `signal` to every registered process that is still running.
    ///
    /// Stops at the first failed delivery; earlier deliveries stand. A
    /// process that exited in the meantime is not a failure.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Signal` naming the process that could not be
    /// signalled.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        for member in self.snapshot().await {
            if member.has_exited() {
                continue;
            }
            deliver(member.pid, signal).map_err(|err| {
                AppError::Signal(format!(
                    "sending {signal} to pid {} (command {}): {err}",
                    member.pid,
                    member.command.id()
                ))
            })?;
        }
        debug!(group = self.name, %signal, "signal delivered");
        Ok(())
    }

    /// Kill and de-register the process with id `pid`.
    ///
    /// A running member is preferred over an exited one whose pid has since
    /// been reused.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such process is registered,
    /// `AppError::Signal` if the kill fails, or `AppError::WaitTimeout` if
    /// the process is not reaped within the stop grace period. The process
    /// is de-registered in the last two cases too.
    pub async fn stop(&self, pid: u32) -> Result<()> {
        let snapshot = self.snapshot().await;
        let member = snapshot
            .iter()
            .find(|m| m.pid == pid && !m.has_exited())
            .or_else(|| snapshot.iter().find(|m| m.pid == pid))
            .ok_or_else(|| AppError::NotFound(format!("process {pid} not found")))?;

        let result = terminate(member, self.stop_grace).await;
        self.deregister(&[member.key]).await;
        result
    }

    /// Kill and de-register the processes started for `command_ids`, or
    /// every process when `command_ids` is empty.
    ///
    /// Unknown identities are ignored. Remaining processes keep their
    /// relative order.
    ///
    /// # Errors
    ///
    /// Returns the first failure among the targeted processes; all of them
    /// are de-registered regardless.
    pub async fn remove(&self, command_ids: &[String]) -> Result<()> {
        self.teardown(command_ids, self.stop_grace).await
    }

    /// Kill and de-register every process, allowing `grace` for reaping.
    ///
    /// # Errors
    ///
    /// Returns the first failure; bookkeeping is cleared regardless.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        self.teardown(&[], grace).await
    }

    async fn teardown(&self, command_ids: &[String], grace: Duration) -> Result<()> {
        let targets: Vec<Member> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|m| command_ids.is_empty() || command_ids.iter().any(|id| id == m.command.id()))
            .collect();

        let results = join_all(targets.iter().map(|m| terminate(m, grace))).await;
        let keys: Vec<u64> = targets.iter().map(|m| m.key).collect();
        self.deregister(&keys).await;

        info!(group = self.name, removed = keys.len(), "processes removed");
        results.into_iter().collect()
    }

    /// Wait until every process registered right now has exited, one of
    /// them fails, or `timeout` elapses.
    ///
    /// Processes started after this call are not covered. A timeout leaves
    /// every process running and registered.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ProcessExit` for the first process observed to
    /// fail, or `AppError::WaitTimeout` when the deadline passes first.
    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        let mut pending: FuturesUnordered<_> = self
            .snapshot()
            .await
            .into_iter()
            .map(|member| async move {
                let mut rx = member.progress;
                // A dropped sender means the observer is gone with its child.
                let outcome = rx
                    .wait_for(Progress::is_done)
                    .await
                    .ok()
                    .and_then(|progress| progress.outcome());
                (member.command, outcome.unwrap_or(Outcome::Terminated))
            })
            .collect();

        let drained = async {
            while let Some((command, outcome)) = pending.next().await {
                if let Outcome::Failed(detail) = outcome {
                    return Err(AppError::ProcessExit {
                        command_id: command.id().to_owned(),
                        detail: format!("{}: {detail}", command.args().join(" ")),
                    });
                }
            }
            Ok(())
        };

        tokio::time::timeout(timeout, drained)
            .await
            .map_err(|_| AppError::WaitTimeout(format!("timeout after {timeout:?}")))?
    }

    /// Commands of the registered processes, in registration order.
    ///
    /// The snapshot may be stale as soon as it is returned.
    pub async fn commands(&self) -> Vec<Command> {
        self.members
            .lock()
            .await
            .iter()
            .map(|m| m.command.clone())
            .collect()
    }

    /// Registered processes with their pids and outcomes.
    pub async fn processes(&self) -> Vec<ProcessInfo> {
        self.members
            .lock()
            .await
            .iter()
            .map(|m| ProcessInfo {
                command: m.command.clone(),
                pid: m.pid,
                outcome: m.progress.borrow().outcome(),
            })
            .collect()
    }

    /// Number of registered processes.
    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Whether no process is registered.
    pub async fn is_empty(&self) -> bool {
        self.members.lock().await.is_empty()
    }

    async fn snapshot(&self) -> Vec<Member> {
        self.members.lock().await.clone()
    }

    async fn deregister(&self, keys: &[u64]) {
        self.members.lock().await.retain(|m| !keys.contains(&m.key));
    }
}

/// Build the OS command for `cmd`: argument 0 is the program, an empty
/// environment inherits ours, stdin is closed and both outputs are piped.
fn build_process(cmd: &Command) -> ProcessCommand {
    let mut process = ProcessCommand::new(cmd.program());
    process.args(cmd.args().iter().skip(1));
    if !cmd.env().is_empty() {
        process.env_clear();
        for (key, value) in cmd.env().iter().filter_map(|var| var.split_once('=')) {
            process.env(key, value);
        }
    }
    process
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    process
}

/// Observer task: reap the child, drain its capture, publish the outcome.
async fn observe(
    group: String,
    command_id: String,
    mut child: Child,
    capture: CaptureHandles,
    terminated: Arc<AtomicBool>,
    tx: watch::Sender<Progress>,
) {
    let status = child.wait().await;
    let outcome = match status {
        _ if terminated.load(Ordering::SeqCst) => Outcome::Terminated,
        Ok(status) if status.success() => Outcome::Success,
        Ok(status) => Outcome::Failed(status.to_string()),
        Err(err) => Outcome::Failed(format!("waiting for process: {err}")),
    };
    tx.send_replace(Progress::Reaped);
    capture.drain(CAPTURE_DRAIN_GRACE).await;

    match &outcome {
        Outcome::Failed(detail) => warn!(group, command_id, %detail, "process failed"),
        _ => info!(group, command_id, ?outcome, "process exited"),
    }
    tx.send_replace(Progress::Done(outcome));
}

/// Mark `member` as supervisor-terminated, kill it, and wait up to `grace`
/// for its observer to reap it.
async fn terminate(member: &Member, grace: Duration) -> Result<()> {
    member.terminated.store(true, Ordering::SeqCst);
    if !member.has_exited() {
        deliver(member.pid, Signal::SIGKILL).map_err(|err| {
            AppError::Signal(format!("killing pid {}: {err}", member.pid))
        })?;
    }

    let mut rx = member.progress.clone();
    let reaped = tokio::time::timeout(grace, rx.wait_for(Progress::is_reaped))
        .await
        .is_ok();
    if reaped {
        Ok(())
    } else {
        Err(AppError::WaitTimeout(format!(
            "process {} (command {}) not reaped within {grace:?}",
            member.pid,
            member.command.id()
        )))
    }
}

/// Send `signal` to `pid`, treating an already-exited process as success.
fn deliver(pid: u32, signal: Signal) -> std::result::Result<(), Errno> {
    let raw = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
impl Group {
    /// Register `cmd` as running under `pid` without spawning anything. The
    /// member advances only through the returned sender.
    pub(crate) async fn register_detached(
        &self,
        cmd: Command,
        pid: u32,
    ) -> watch::Sender<Progress> {
        let (tx, rx) = watch::channel(Progress::Running);
        self.register(cmd, pid, Arc::new(AtomicBool::new(false)), rx).await;
        tx
    }
}

/// Above the kernel pid limit, so never a live process.
#[cfg(test)]
pub(crate) const UNUSED_PID: u32 = 2_147_483_647;
