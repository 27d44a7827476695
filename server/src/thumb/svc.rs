use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_cell::sync::AsyncCell;
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{Mutex, mpsc};
use tracing::{Level, debug, error, info, instrument, warn};

use crate::service::{
    GlimpseService, GsError, GsInner, Gsm, GsmReceiver, GsmRegistry, ServiceType,
};
use crate::thumb::{GsThumbService, artifact_path, asset_path, msg::ThumbMsg, scratch_base};
use api::ThumbStatus;
use common::config::GsConfig;
use common::media::{
    cache_key, normalize_path,
    video::{ExtractError, FrameOptions, ScratchGuard, extract_frame, probe_extractor},
};

const EVICTION_PERIOD: Duration = Duration::from_secs(24 * 3600);

pub struct ThumbService {
    config: Arc<GsConfig>,
    receiver: Arc<Mutex<GsmReceiver>>,
    handle: AsyncCell<tokio::task::JoinHandle<Result<()>>>,
    worker_handle: AsyncCell<tokio::task::JoinHandle<()>>,
    evict_handle: AsyncCell<tokio::task::JoinHandle<()>>,
}

#[async_trait]
impl GlimpseService for ThumbService {
    type Inner = ThumbRunner;

    fn create(config: Arc<GsConfig>, registry: &GsmRegistry) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel::<Gsm>(1024);

        registry
            .insert(ServiceType::Thumb, tx)
            .expect("failed to add thumb sender to registry");

        ThumbService {
            config: config.clone(),
            receiver: Arc::new(Mutex::new(rx)),
            handle: AsyncCell::new(),
            worker_handle: AsyncCell::new(),
            evict_handle: AsyncCell::new(),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self, registry))]
    async fn start(&self, registry: &GsmRegistry) -> Result<()> {
        info!("starting");

        let receiver = Arc::clone(&self.receiver);
        let state = Arc::new(ThumbRunner::new(self.config.clone(), registry.clone())?);

        // the single generation worker; lives as long as the process
        self.worker_handle
            .set(tokio::task::spawn(run_worker(Arc::clone(&state))));

        // periodic cache maintenance, peripheral to the core pipeline
        self.evict_handle
            .set(tokio::task::spawn(run_eviction(Arc::clone(&state))));

        let serve = {
            async move {
                let mut receiver = receiver.lock().await;

                while let Some(msg) = receiver.recv().await {
                    let state = Arc::clone(&state);
                    tokio::task::spawn(async move {
                        match state.message_handler(msg).await {
                            Ok(()) => (),
                            Err(err) => {
                                error!({service = "thumb", channel = "gsm", error = %err})
                            }
                        }
                    });
                }

                Err(anyhow::Error::msg("thumb service gsm channel disconnected"))
            }
        };

        self.handle.set(tokio::task::spawn(serve));

        debug!("started");
        Ok(())
    }
}

// the state shared between the rpc handlers and the worker: the generation
// queue, the in-flight set, and the extractor capability flag
//
// the in-flight set is what makes enqueuing idempotent; an entry is removed
// only after the worker has fully handled the request
#[derive(Debug)]
pub struct ThumbRunner {
    config: Arc<GsConfig>,
    registry: GsmRegistry,
    queue: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    in_flight: DashMap<String, ()>,
    extractor_ok: AtomicBool,
}

#[async_trait]
impl GsInner for ThumbRunner {
    fn new(config: Arc<GsConfig>, registry: GsmRegistry) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(ThumbRunner {
            config,
            registry,
            queue: tx,
            queue_rx: Mutex::new(Some(rx)),
            in_flight: DashMap::new(),
            extractor_ok: AtomicBool::new(true),
        })
    }

    fn registry(&self) -> GsmRegistry {
        self.registry.clone()
    }

    async fn message_handler(&self, msg: Gsm) -> Result<()> {
        match msg {
            Gsm::Thumb(message) => match message {
                ThumbMsg::Status { resp, path } => self.respond(resp, self.status(path)).await,
                ThumbMsg::RequestGeneration { resp, path } => {
                    self.respond(resp, self.request_generation(path)).await
                }
                ThumbMsg::GetArtifact { resp, path } => {
                    self.respond(resp, self.get_artifact(path)).await
                }
                ThumbMsg::EvictStale { resp, max_age_days } => {
                    self.respond(resp, self.evict_stale(max_age_days)).await
                }
            },
        }
    }
}

#[async_trait]
impl GsThumbService for ThumbRunner {
    // cheap by construction: two stat calls and a set lookup, since this
    // runs on every preview request, including polling
    #[instrument(level=Level::DEBUG, skip(self))]
    async fn status(&self, path: String) -> Result<ThumbStatus, GsError> {
        let rel = normalize_path(&path).map_err(|err| GsError::InvalidInput(err.to_string()))?;

        let asset = asset_path(self.config.clone(), &rel);

        let asset_meta = match tokio::fs::metadata(&asset).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ThumbStatus::FileNotFound);
            }
            Err(err) => return Err(err.into()),
        };

        if self.in_flight.contains_key(&rel) {
            return Ok(ThumbStatus::Generating);
        }

        let key = cache_key(&rel)?;

        let artifact_meta = match tokio::fs::metadata(artifact_path(self.config.clone(), &key)).await
        {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        // strictly newer counts as fresh; an exact mtime tie is treated as
        // outdated since coarse filesystem clocks make it ambiguous
        let fresh = match &artifact_meta {
            Some(meta) => meta.modified()? > asset_meta.modified()?,
            None => false,
        };

        if fresh {
            return Ok(ThumbStatus::Ready);
        }

        if !self.extractor_ok.load(Ordering::Relaxed) {
            return Ok(ThumbStatus::Error);
        }

        match artifact_meta {
            Some(_) => Ok(ThumbStatus::Outdated),
            None => Ok(ThumbStatus::NotGenerated),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self))]
    async fn request_generation(&self, path: String) -> Result<bool, GsError> {
        let rel = normalize_path(&path).map_err(|err| GsError::InvalidInput(err.to_string()))?;

        match tokio::fs::try_exists(asset_path(self.config.clone(), &rel)).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(err) => return Err(err.into()),
        }

        if !self.extractor_ok.load(Ordering::Relaxed) {
            return Ok(false);
        }

        // idempotent enqueue: a second request while one is in flight is
        // satisfied by the same regeneration
        match self.in_flight.entry(rel.clone()) {
            Entry::Occupied(_) => return Ok(true),
            Entry::Vacant(entry) => {
                entry.insert(());
            }
        }

        if self.queue.send(rel.clone()).is_err() {
            self.in_flight.remove(&rel);
            return Err(GsError::ChannelSend);
        }

        debug!("queued thumbnail generation");
        Ok(true)
    }

    #[instrument(level=Level::DEBUG, skip(self))]
    async fn get_artifact(&self, path: String) -> Result<Option<Vec<u8>>, GsError> {
        if self.status(path.clone()).await? != ThumbStatus::Ready {
            return Ok(None);
        }

        let key = cache_key(&path)?;

        match tokio::fs::read(artifact_path(self.config.clone(), &key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            // lost a race with eviction; the caller re-requests
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(level=Level::DEBUG, skip(self))]
    async fn evict_stale(&self, max_age_days: u64) -> Result<u64, GsError> {
        let cutoff = match SystemTime::now()
            .checked_sub(Duration::from_secs(max_age_days * 24 * 3600))
        {
            Some(cutoff) => cutoff,
            None => return Ok(0),
        };

        let mut removed = 0;

        let mut entries = tokio::fs::read_dir(&self.config.fs.cache_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if path.extension().and_then(|ext| ext.to_str()) != Some("jpg") {
                continue;
            }

            let meta = entry.metadata().await?;

            if !meta.is_file() || meta.modified()? >= cutoff {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(err) => warn!({error = %err}, "failed to evict stale thumbnail"),
            }
        }

        Ok(removed)
    }
}

impl ThumbRunner {
    // one queue item, end to end; every failure here is logged by the
    // worker loop and must never take the worker down
    async fn generate(&self, rel: &str) -> Result<()> {
        let config = self.config.clone();

        let asset = asset_path(config.clone(), rel);

        let asset_meta = match tokio::fs::metadata(&asset).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("asset vanished before generation");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let key = cache_key(rel)?;
        let artifact = artifact_path(config.clone(), &key);

        // the entry may have been satisfied while this request sat in the
        // queue; requeued duplicates all land here and become no-ops
        if let Ok(meta) = tokio::fs::metadata(&artifact).await {
            if meta.modified()? > asset_meta.modified()? {
                debug!("artifact already fresh");
                return Ok(());
            }
        }

        if !self.extractor_ok.load(Ordering::Relaxed) {
            return Err(anyhow::Error::msg("frame extractor marked unavailable"));
        }

        let scratch = scratch_base(config.clone()).join(&key);
        let _guard = ScratchGuard::new(scratch.clone());

        let opts = FrameOptions {
            ffmpeg: config.thumb.ffmpeg.clone(),
            width: config.thumb.width,
            height: config.thumb.height,
            timeout: config.thumb.timeout_duration(),
        };

        match extract_frame(&asset, &scratch, &opts).await {
            Ok(frame) => {
                // atomic publish: a reader sees either no artifact or a
                // fully written one, never a partial file
                tokio::fs::rename(&frame, &artifact).await?;

                info!({path = rel}, "thumbnail generated");
                Ok(())
            }
            Err(ExtractError::BinaryMissing) => {
                self.extractor_ok.store(false, Ordering::Relaxed);
                Err(anyhow::Error::msg(
                    "frame extraction binary missing, disabling generation",
                ))
            }
            // timeouts and per-file failures are transient: the next client
            // request retries naturally
            Err(err) => Err(anyhow::Error::from(err)),
        }
    }
}

// the single background worker
//
// drains the generation queue one request at a time and never terminates
// under normal operation; per-item errors are logged and swallowed
async fn run_worker(state: Arc<ThumbRunner>) {
    if !probe_extractor(&state.config.thumb.ffmpeg).await {
        warn!("frame extractor unavailable, video thumbnails disabled");
        state.extractor_ok.store(false, Ordering::Relaxed);
    }

    let mut receiver = match state.queue_rx.lock().await.take() {
        Some(receiver) => receiver,
        None => {
            error!("thumbnail worker started twice");
            return;
        }
    };

    info!("thumbnail worker running");

    while let Some(rel) = receiver.recv().await {
        if let Err(err) = state.generate(&rel).await {
            warn!({path = rel.as_str(), error = %err}, "thumbnail generation failed");
        }

        state.in_flight.remove(&rel);
    }

    // all senders dropped; only happens at process teardown
    info!("thumbnail worker stopped");
}

async fn run_eviction(state: Arc<ThumbRunner>) {
    let mut ticker = tokio::time::interval(EVICTION_PERIOD);

    loop {
        ticker.tick().await;

        match state.evict_stale(state.config.thumb.max_age_days).await {
            Ok(0) => {}
            Ok(removed) => info!({removed = removed}, "evicted stale thumbnails"),
            Err(err) => warn!({error = %err}, "thumbnail eviction failed"),
        }
    }
}
