use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::PlaybackEvent;
use crate::cache::MediaFileCache;
use crate::error::ResolveError;
use crate::sources::LookupService;

/// Resultado de pedir una descarga.
#[derive(Debug)]
pub enum DownloadStart {
    AlreadyCached,
    AlreadyRunning,
    /// [`DownloadManager::cancel_all`] was called.
    ShuttingDown,
    Started(DownloadHandle),
}

/// A running download job.
#[derive(Debug)]
pub struct DownloadHandle {
    job: JoinHandle<bool>,
    cancel: CancellationToken,
}

impl DownloadHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves to `true` when the file landed in the cache.
    pub async fn wait(self) -> bool {
        self.job.await.unwrap_or(false)
    }
}

/// Descargas en segundo plano hacia la caché de audio, como mucho una por
/// item.
pub struct DownloadManager {
    inflight: Arc<DashMap<String, CancellationToken>>,
    media: Arc<MediaFileCache>,
    lookup: Arc<dyn LookupService>,
    timeout: Duration,
    root: CancellationToken,
    events: broadcast::Sender<PlaybackEvent>,
}

impl DownloadManager {
    pub fn new(
        media: Arc<MediaFileCache>,
        lookup: Arc<dyn LookupService>,
        timeout: Duration,
        events: broadcast::Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            inflight: Arc::new(DashMap::new()),
            media,
            lookup,
            timeout,
            root: CancellationToken::new(),
            events,
        }
    }

    pub fn is_running(&self, item_id: &str) -> bool {
        self.inflight.contains_key(item_id)
    }

    pub fn running(&self) -> usize {
        self.inflight.len()
    }

    /// Starts a background download of `item_id` unless it is cached or a
    /// download for it is already running.
    ///
    /// Completion always writes to the cache, even when playback has moved
    /// on to another item.
    pub fn ensure(&self, item_id: &str) -> DownloadStart {
        if self.root.is_cancelled() {
            return DownloadStart::ShuttingDown;
        }

        // checked while holding the slot: a job inserts into the cache
        // before it frees its slot
        let token = match self.inflight.entry(item_id.to_string()) {
            Entry::Occupied(_) => {
                debug!("download for {} already running", item_id);
                return DownloadStart::AlreadyRunning;
            }
            Entry::Vacant(_) if self.media.contains(item_id) => {
                return DownloadStart::AlreadyCached;
            }
            Entry::Vacant(slot) => slot.insert(self.root.child_token()).clone(),
        };

        let job = DownloadJob {
            item_id: item_id.to_string(),
            media: self.media.clone(),
            lookup: self.lookup.clone(),
            timeout: self.timeout,
            inflight: self.inflight.clone(),
            events: self.events.clone(),
        };
        DownloadStart::Started(DownloadHandle {
            job: tokio::spawn(job.run(token.clone())),
            cancel: token,
        })
    }

    /// Stops every running download and refuses new ones.
    pub fn cancel_all(&self) {
        self.root.cancel();
    }
}

struct DownloadJob {
    item_id: String,
    media: Arc<MediaFileCache>,
    lookup: Arc<dyn LookupService>,
    timeout: Duration,
    inflight: Arc<DashMap<String, CancellationToken>>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl DownloadJob {
    async fn run(self, cancel: CancellationToken) -> bool {
        let partial = self.media.partial_path(&self.item_id);
        info!("⬇️ Background download started: {}", self.item_id);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ResolveError::transient("download cancelled")),
            result = self.fetch(&partial) => result,
        };

        let stored = match outcome {
            Ok(()) => match self.media.insert_file(&self.item_id, &partial) {
                Ok(bytes) => {
                    info!("💾 Cached audio for {} ({} bytes)", self.item_id, bytes);
                    let _ = self.events.send(PlaybackEvent::DownloadCompleted {
                        item_id: self.item_id.clone(),
                    });
                    true
                }
                Err(e) => {
                    warn!("⚠️ Could not store download for {}: {}", self.item_id, e);
                    self.fail(&partial, e.to_string()).await;
                    false
                }
            },
            Err(e) => {
                warn!("⚠️ Download failed for {}: {}", self.item_id, e);
                self.fail(&partial, e.to_string()).await;
                false
            }
        };

        // only after the file is visible in the cache
        self.inflight.remove(&self.item_id);
        stored
    }

    async fn fetch(&self, partial: &std::path::Path) -> Result<(), ResolveError> {
        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ResolveError::transient)?;
        }
        match tokio::time::timeout(self.timeout, self.lookup.download(&self.item_id, partial)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(self.timeout)),
        }
    }

    async fn fail(&self, partial: &std::path::Path, reason: String) {
        let _ = tokio::fs::remove_file(partial).await;
        let _ = self.events.send(PlaybackEvent::DownloadFailed {
            item_id: self.item_id.clone(),
            reason,
        });
    }
}
