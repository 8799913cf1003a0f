//! Output capture for supervised processes.
//!
//! Every started command gets a `<command_id>.stdout` and
//! `<command_id>.stderr` file under the root directory. Both files are
//! created before the process is spawned, then one copy task per stream
//! appends whatever the pipe yields and syncs the file after each write.
//!
//! Copy failures are logged and otherwise dropped: a full disk never fails
//! a process start.

use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{AppError, Result};

const COPY_BUFFER_BYTES: usize = 8 * 1024;

/// Line reader over a capture file, as returned by `Groups::logs`.
pub type LogLines = Lines<BufReader<File>>;

/// Which standard stream of a process a capture file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output (file descriptor 1).
    Stdout,
    /// Standard error (file descriptor 2).
    Stderr,
}

impl OutputStream {
    /// File extension used for this stream's capture file.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl Display for OutputStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl TryFrom<i32> for OutputStream {
    type Error = AppError;

    fn try_from(fd: i32) -> Result<Self> {
        match fd {
            1 => Ok(Self::Stdout),
            2 => Ok(Self::Stderr),
            other => Err(AppError::InvalidArgument(format!(
                "fd ({other}) must be either 1 (stdout) or 2 (stderr)"
            ))),
        }
    }
}

impl FromStr for OutputStream {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "stdout" | "1" => Ok(Self::Stdout),
            "stderr" | "2" => Ok(Self::Stderr),
            other => Err(AppError::InvalidArgument(format!(
                "stream ({other}) must be either stdout or stderr"
            ))),
        }
    }
}

/// Creates and reads capture files under a root directory.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    root: PathBuf,
}

impl OutputCapture {
    /// Capture files live directly under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the capture files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the capture file for `command_id` and `stream`.
    #[must_use]
    pub fn path(&self, command_id: &str, stream: OutputStream) -> PathBuf {
        self.root.join(format!("{command_id}.{}", stream.extension()))
    }

    /// Create fresh (truncated) capture files for `command_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if either file cannot be created.
    pub async fn prepare(&self, command_id: &str) -> Result<CaptureFiles> {
        let stdout_path = self.path(command_id, OutputStream::Stdout);
        let stdout = File::create(&stdout_path).await.map_err(|err| {
            AppError::Io(format!("creating {}: {err}", stdout_path.display()))
        })?;
        let stderr_path = self.path(command_id, OutputStream::Stderr);
        let stderr = File::create(&stderr_path).await.map_err(|err| {
            AppError::Io(format!("creating {}: {err}", stderr_path.display()))
        })?;

        Ok(CaptureFiles {
            command_id: command_id.to_owned(),
            stdout: (stdout, stdout_path),
            stderr: (stderr, stderr_path),
        })
    }

    /// Open a capture file for line-oriented reading.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if nothing was ever captured for
    /// `command_id`, or `AppError::Io` on any other open failure.
    pub async fn open(&self, command_id: &str, stream: OutputStream) -> Result<LogLines> {
        let path = self.path(command_id, stream);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AppError::NotFound(format!("no {stream} capture for command {command_id}"))
            } else {
                AppError::Io(format!("opening {}: {err}", path.display()))
            }
        })?;
        Ok(BufReader::new(file).lines())
    }
}

/// Capture files created for one command, not yet attached to pipes.
#[derive(Debug)]
pub struct CaptureFiles {
    command_id: String,
    stdout: (File, PathBuf),
    stderr: (File, PathBuf),
}

impl CaptureFiles {
    /// Spawn the two copy tasks draining `stdout` and `stderr`.
    #[must_use]
    pub fn attach<O, E>(self, stdout: O, stderr: E) -> CaptureHandles
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (out_file, out_path) = self.stdout;
        let (err_file, err_path) = self.stderr;
        CaptureHandles {
            stdout: spawn_copy(self.command_id.clone(), stdout, out_file, out_path),
            stderr: spawn_copy(self.command_id, stderr, err_file, err_path),
        }
    }
}

/// Join handles of a command's copy tasks.
#[derive(Debug)]
pub struct CaptureHandles {
    stdout: JoinHandle<()>,
    stderr: JoinHandle<()>,
}

impl CaptureHandles {
    /// Wait up to `grace` for both copy tasks to reach end-of-stream.
    ///
    /// A pipe can outlive its process when a grandchild inherited it; such
    /// copies are left running in the background.
    pub async fn drain(self, grace: Duration) {
        let both = async move {
            let _ = self.stdout.await;
            let _ = self.stderr.await;
        };
        if tokio::time::timeout(grace, both).await.is_err() {
            debug!(?grace, "capture still draining after process exit");
        }
    }
}

fn spawn_copy<R>(command_id: String, src: R, dst: File, path: PathBuf) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = copy_stream(src, dst).await {
            warn!(command_id, path = %path.display(), %err, "output capture failed");
        }
    })
}

/// Copy `src` into `dst` until end-of-stream, syncing after every chunk.
async fn copy_stream<R>(mut src: R, mut dst: File) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0_u8; COPY_BUFFER_BYTES];
    let mut total = 0_u64;
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        dst.sync_data().await?;
        total += n as u64;
    }
    Ok(total)
}
