use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::service::{GsError, GsInner};
use api::{SCRATCH_PATH, ThumbStatus};
use common::config::GsConfig;

pub mod msg;
pub mod svc;

// thumbnail service rpc surface
//
// request_generation is deliberately non-blocking: it either refuses
// outright (missing asset, extractor gone) or enqueues and returns, and the
// background worker does everything else
#[async_trait]
pub trait GsThumbService: GsInner {
    async fn status(&self, path: String) -> Result<ThumbStatus, GsError>;

    async fn request_generation(&self, path: String) -> Result<bool, GsError>;

    // artifact bytes, but only when the entry is Ready
    async fn get_artifact(&self, path: String) -> Result<Option<Vec<u8>>, GsError>;

    // age-based cache maintenance, returns the number of artifacts removed
    async fn evict_stale(&self, max_age_days: u64) -> Result<u64, GsError>;
}

// cache layout helpers
//
// the cache dir holds one jpg per asset, named by the stable hash of the
// asset's logical path, plus a scratch subdirectory for extraction output
pub fn asset_path(config: Arc<GsConfig>, rel: &str) -> PathBuf {
    config.fs.media_srcdir.join(rel)
}

pub fn artifact_path(config: Arc<GsConfig>, key: &str) -> PathBuf {
    config.fs.cache_dir.join(format!("{key}.jpg"))
}

pub fn scratch_base(config: Arc<GsConfig>) -> PathBuf {
    config.fs.cache_dir.join(SCRATCH_PATH)
}
