use parking_lot::Mutex as SyncMutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use super::control::{ControlChannel, Delivery, TransportCommand};
use super::download::{DownloadManager, DownloadStart};
use super::process::{wait_exit, PlaybackSource, PlayerBackend, PlayerProcess};
use crate::cache::{CacheTiers, Lookup, MediaFileCache, ResolvedUrlCache};
use crate::config::Config;
use crate::error::{PlaybackError, ResolveError};
use crate::sources::LookupService;

const EVENT_CAPACITY: usize = 64;

/// Estado visible del coordinador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Resolving { item_id: String },
    Starting { item_id: String },
    Playing { item_id: String, from_cache: bool },
    Stopped { item_id: String },
}

impl SessionState {
    pub fn item_id(&self) -> Option<&str> {
        match self {
            SessionState::Idle => None,
            SessionState::Resolving { item_id }
            | SessionState::Starting { item_id }
            | SessionState::Playing { item_id, .. }
            | SessionState::Stopped { item_id } => Some(item_id),
        }
    }

    pub fn accepts_transport(&self) -> bool {
        matches!(self, SessionState::Starting { .. } | SessionState::Playing { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Resolving { .. } => "resolving",
            SessionState::Starting { .. } => "starting",
            SessionState::Playing { .. } => "playing",
            SessionState::Stopped { .. } => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    StateChanged(SessionState),
    /// The player exited on its own.
    Finished { item_id: String },
    DownloadCompleted { item_id: String },
    DownloadFailed { item_id: String, reason: String },
}

#[derive(Debug)]
pub enum CommandOutcome {
    Sent(Delivery),
    /// No session that could take the command.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub item_id: String,
    pub from_cache: bool,
}

/// Tiempos y rutas del coordinador.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub runtime_dir: PathBuf,
    pub control_timeout: Duration,
    pub stop_grace_period: Duration,
    pub resolve_timeout: Duration,
    pub download_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            runtime_dir: config.runtime_dir(),
            control_timeout: config.control_timeout,
            stop_grace_period: config.stop_grace_period,
            resolve_timeout: config.resolve_timeout,
            download_timeout: config.download_timeout,
        }
    }
}

struct ActiveSession {
    item_id: String,
    generation: u64,
    source: PlaybackSource,
    process: PlayerProcess,
    channel: Arc<ControlChannel>,
}

struct Inner {
    media: Arc<MediaFileCache>,
    urls: Arc<ResolvedUrlCache>,
    lookup: Arc<dyn LookupService>,
    backend: Arc<dyn PlayerBackend>,
    downloads: DownloadManager,
    settings: SessionSettings,
    generation: AtomicU64,
    session: Mutex<Option<ActiveSession>>,
    channel: SyncMutex<Option<Arc<ControlChannel>>>,
    state: SyncMutex<SessionState>,
    events: broadcast::Sender<PlaybackEvent>,
}

/// Coordina una única sesión de reproducción a la vez.
///
/// Starting a new item always tears the previous player down completely
/// before launching the next one. Resolution runs without holding the
/// session lock; a generation counter discards results that a newer
/// `play`/`stop` has made stale.
#[derive(Clone)]
pub struct PlaybackCoordinator {
    inner: Arc<Inner>,
}

impl PlaybackCoordinator {
    pub fn new(
        tiers: &CacheTiers,
        lookup: Arc<dyn LookupService>,
        backend: Arc<dyn PlayerBackend>,
        settings: SessionSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let downloads = DownloadManager::new(
            tiers.media.clone(),
            lookup.clone(),
            settings.download_timeout,
            events.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                media: tiers.media.clone(),
                urls: tiers.urls.clone(),
                lookup,
                backend,
                downloads,
                settings,
                generation: AtomicU64::new(0),
                session: Mutex::new(None),
                channel: SyncMutex::new(None),
                state: SyncMutex::new(SessionState::Idle),
                events,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }

    pub fn downloads(&self) -> &DownloadManager {
        &self.inner.downloads
    }

    /// Plays `item_id`, stopping whatever was playing first.
    pub async fn play(&self, item_id: &str) -> Result<Started, PlaybackError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("🎵 Play requested: {} (generation {})", item_id, generation);

        {
            let mut session = self.inner.session.lock().await;
            if let Some(previous) = session.take() {
                self.teardown(previous).await;
            }
            if !self.is_current(generation) {
                return Err(PlaybackError::Superseded(item_id.to_string()));
            }
            self.set_state(SessionState::Resolving {
                item_id: item_id.to_string(),
            });
        }

        let resolved = self.resolve(item_id).await;

        let mut session = self.inner.session.lock().await;
        if !self.is_current(generation) {
            debug!("discarding stale resolution for {}", item_id);
            return Err(PlaybackError::Superseded(item_id.to_string()));
        }

        let (source, from_cache) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("❌ Could not resolve {}: {}", item_id, e);
                self.set_state(SessionState::Idle);
                return Err(e.into());
            }
        };

        self.set_state(SessionState::Starting {
            item_id: item_id.to_string(),
        });

        let ipc_path = self.socket_path(generation);
        let launched = match tokio::fs::create_dir_all(&self.inner.settings.runtime_dir).await {
            Ok(()) => self.inner.backend.launch(&source, &ipc_path).await,
            Err(e) => Err(PlaybackError::Launch(format!(
                "runtime dir {}: {}",
                self.inner.settings.runtime_dir.display(),
                e
            ))),
        };
        let process = match launched {
            Ok(process) => process,
            Err(e) => {
                warn!("❌ Could not launch player for {}: {}", item_id, e);
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        let channel = Arc::new(ControlChannel::new(
            ipc_path,
            self.inner.settings.control_timeout,
        ));
        self.spawn_exit_watcher(&process, generation, item_id);

        *self.inner.channel.lock() = Some(channel.clone());
        *session = Some(ActiveSession {
            item_id: item_id.to_string(),
            generation,
            source: source.clone(),
            process,
            channel,
        });
        self.set_state(SessionState::Playing {
            item_id: item_id.to_string(),
            from_cache,
        });
        drop(session);

        if let PlaybackSource::Stream(_) = source {
            match self.inner.downloads.ensure(item_id) {
                DownloadStart::Started(_) => debug!("background download queued for {}", item_id),
                other => debug!("no download for {}: {:?}", item_id, other),
            }
        }

        Ok(Started {
            item_id: item_id.to_string(),
            from_cache,
        })
    }

    /// Stops the current session, if any. Running downloads continue.
    pub async fn stop(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let stopped_item = self.state().item_id().map(str::to_string);

        let mut session = self.inner.session.lock().await;
        if let Some(active) = session.take() {
            self.teardown(active).await;
        }

        if let Some(item_id) = stopped_item {
            info!("⏹️ Stopped {}", item_id);
            self.set_state(SessionState::Stopped { item_id });
        }
    }

    /// Stops playback and cancels every background download.
    pub async fn shutdown(&self) {
        self.inner.downloads.cancel_all();
        self.stop().await;
        info!("👋 Playback coordinator shut down");
    }

    pub async fn toggle_pause(&self) -> CommandOutcome {
        self.send(TransportCommand::TogglePause).await
    }

    pub async fn seek(&self, seconds: i64) -> CommandOutcome {
        self.send(TransportCommand::Seek(seconds)).await
    }

    pub async fn adjust_volume(&self, delta: i64) -> CommandOutcome {
        self.send(TransportCommand::AdjustVolume(delta)).await
    }

    async fn send(&self, command: TransportCommand) -> CommandOutcome {
        if !self.state().accepts_transport() {
            debug!("ignoring {:?}: nothing playing", command);
            return CommandOutcome::Ignored;
        }
        let channel = self.inner.channel.lock().clone();
        match channel {
            Some(channel) => CommandOutcome::Sent(channel.send(command).await),
            None => CommandOutcome::Ignored,
        }
    }

    /// Media cache, then URL cache, then the lookup service.
    async fn resolve(&self, item_id: &str) -> Result<(PlaybackSource, bool), ResolveError> {
        if let Lookup::Hit(path) = self.inner.media.get_path(item_id) {
            if tokio::fs::metadata(&path).await.is_ok() {
                info!("💾 Playing {} from local cache", item_id);
                return Ok((PlaybackSource::LocalFile(path), true));
            }
            warn!("⚠️ Cached file for {} vanished, dropping entry", item_id);
            self.inner.media.store().remove(item_id);
        }

        if let Lookup::Hit(url) = self.inner.urls.get(item_id) {
            debug!("resolved URL cache hit: {}", item_id);
            return Ok((PlaybackSource::Stream(url), false));
        }

        let timeout = self.inner.settings.resolve_timeout;
        let url = tokio::time::timeout(timeout, self.inner.lookup.resolve_stream(item_id))
            .await
            .map_err(|_| ResolveError::Timeout(timeout))??;
        self.inner.urls.set(item_id, &url);
        Ok((PlaybackSource::Stream(url), false))
    }

    /// Quit over the channel, grace period, kill, invalidate the channel.
    async fn teardown(&self, mut session: ActiveSession) {
        debug!(
            "tearing down session {} ({}, generation {})",
            session.item_id,
            if session.source.is_local() { "local" } else { "stream" },
            session.generation
        );
        self.inner.channel.lock().take();

        if !session.process.has_exited() {
            let _ = session.channel.send(TransportCommand::Quit).await;
        }
        match session
            .process
            .terminate(self.inner.settings.stop_grace_period)
            .await
        {
            Some(exit) => debug!("player for {} exited: {:?}", session.item_id, exit),
            None => warn!("⚠️ Player for {} did not report an exit", session.item_id),
        }

        session.channel.invalidate().await;
        let _ = tokio::fs::remove_file(session.channel.path()).await;
    }

    fn spawn_exit_watcher(&self, process: &PlayerProcess, generation: u64, item_id: &str) {
        let coordinator = self.clone();
        let exited = process.exit_watcher();
        let item_id = item_id.to_string();

        tokio::spawn(async move {
            let exit = wait_exit(exited).await;
            if !coordinator.is_current(generation) {
                return;
            }

            let mut session = coordinator.inner.session.lock().await;
            let still_current = session.as_ref().map(|s| s.generation) == Some(generation);
            if !still_current || !coordinator.is_current(generation) {
                return;
            }

            if let Some(finished) = session.take() {
                coordinator.inner.channel.lock().take();
                finished.channel.invalidate().await;
                let _ = tokio::fs::remove_file(finished.channel.path()).await;
            }
            info!("🏁 Finished {} ({:?})", item_id, exit);
            coordinator.set_state(SessionState::Idle);
            let _ = coordinator
                .inner
                .events
                .send(PlaybackEvent::Finished { item_id });
        });
    }

    fn socket_path(&self, generation: u64) -> PathBuf {
        self.inner
            .settings
            .runtime_dir
            .join(format!("{}-{}.sock", std::process::id(), generation))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, state: SessionState) {
        {
            let mut current = self.inner.state.lock();
            if *current == state {
                return;
            }
            *current = state.clone();
        }
        debug!("state -> {}", state.label());
        let _ = self.inner.events.send(PlaybackEvent::StateChanged(state));
    }
}
