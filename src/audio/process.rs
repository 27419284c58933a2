use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::PlaybackError;

/// Lo que se le pasa al reproductor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSource {
    LocalFile(PathBuf),
    Stream(String),
}

impl PlaybackSource {
    pub fn is_local(&self) -> bool {
        matches!(self, PlaybackSource::LocalFile(_))
    }

    fn as_arg(&self) -> String {
        match self {
            PlaybackSource::LocalFile(path) => path.to_string_lossy().into_owned(),
            PlaybackSource::Stream(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Ended by [`PlayerProcess::terminate`] rather than on its own.
    pub killed: bool,
}

impl ExitInfo {
    fn from_status(status: std::io::Result<ExitStatus>, killed: bool) -> Self {
        Self {
            code: status.ok().and_then(|s| s.code()),
            killed,
        }
    }
}

/// Handle to a running player process.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct PlayerProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<Option<ExitInfo>>,
}

impl PlayerProcess {
    /// Builds a handle from its parts. The owner of `exit_tx` must publish
    /// `Some(info)` once the process is gone, and must treat a message (or a
    /// dropped sender) on `kill_rx` as a kill request.
    pub fn from_parts(
        pid: Option<u32>,
        kill_tx: oneshot::Sender<()>,
        exited: watch::Receiver<Option<ExitInfo>>,
    ) -> Self {
        Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
        }
    }

    /// Supervises `child` on a background task.
    pub fn monitor(mut child: Child) -> Self {
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let info = tokio::select! {
                status = child.wait() => ExitInfo::from_status(status, false),
                _ = kill_rx => {
                    if let Err(e) = child.start_kill() {
                        debug!("kill failed (already gone?): {}", e);
                    }
                    ExitInfo::from_status(child.wait().await, true)
                }
            };
            debug!("player process {:?} exited: {:?}", pid, info);
            let _ = exit_tx.send(Some(info));
        });

        Self::from_parts(pid, kill_tx, exit_rx)
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    /// Receiver that flips to `Some` when the process ends.
    pub fn exit_watcher(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exited.clone()
    }

    /// Waits for the process to end on its own.
    pub async fn wait(&self) -> Option<ExitInfo> {
        wait_exit(self.exit_watcher()).await
    }

    /// Gives the process `grace` to exit, then kills it and waits at most
    /// another `grace`. Returns `None` only if it never reported an exit.
    pub async fn terminate(&mut self, grace: Duration) -> Option<ExitInfo> {
        if let Ok(info) = tokio::time::timeout(grace, self.wait()).await {
            return info;
        }

        warn!("⏱️ Player {:?} ignored quit, killing", self.pid);
        if let Some(kill) = self.kill_tx.take() {
            let _ = kill.send(());
        }

        tokio::time::timeout(grace, self.wait()).await.ok().flatten()
    }
}

pub async fn wait_exit(mut exited: watch::Receiver<Option<ExitInfo>>) -> Option<ExitInfo> {
    match exited.wait_for(Option::is_some).await {
        Ok(info) => *info,
        Err(_) => None,
    }
}

/// Arranca procesos de reproductor.
#[async_trait]
pub trait PlayerBackend: Send + Sync {
    /// Starts a player for `source` listening for control commands on
    /// `ipc_path`.
    async fn launch(&self, source: &PlaybackSource, ipc_path: &Path)
        -> Result<PlayerProcess, PlaybackError>;
}

/// Reproductor mpv sin vídeo.
#[derive(Debug, Clone)]
pub struct MpvBackend {
    binary: String,
}

impl MpvBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn args(source: &PlaybackSource, ipc_path: &Path) -> Vec<String> {
        vec![
            "--no-video".to_string(),
            "--audio-display=no".to_string(),
            "--idle=no".to_string(),
            "--network-timeout=5".to_string(),
            "--msg-level=all=warn".to_string(),
            format!("--input-ipc-server={}", ipc_path.display()),
            source.as_arg(),
        ]
    }

    /// Verifica que mpv esté instalado
    pub async fn verify_available(&self) -> Result<String, PlaybackError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| PlaybackError::Launch(format!("{}: {}", self.binary, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl PlayerBackend for MpvBackend {
    async fn launch(
        &self,
        source: &PlaybackSource,
        ipc_path: &Path,
    ) -> Result<PlayerProcess, PlaybackError> {
        // stale socket from a crashed run
        let _ = tokio::fs::remove_file(ipc_path).await;

        let mut child = Command::new(&self.binary)
            .args(Self::args(source, ipc_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlaybackError::Launch(format!("{} not found in PATH", self.binary))
                } else {
                    PlaybackError::Launch(e.to_string())
                }
            })?;

        info!(
            "▶️ {} started (pid {:?}) for {}",
            self.binary,
            child.id(),
            if source.is_local() { "cached file" } else { "stream" }
        );

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("mpv: {}", line);
                }
            });
        }

        Ok(PlayerProcess::monitor(child))
    }
}
