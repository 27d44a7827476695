use std::path::Path;

use serde::{self, Deserialize, Serialize};

// subdirectory of the cache dir used for in-progress extraction output
//
// artifacts are only ever renamed out of here, so readers can treat
// anything directly in the cache dir as fully written
pub const SCRATCH_PATH: &str = "scratch";

// the file types we are willing to serve
//
// these tables gate both the preview endpoints and the thumbnail cache, so
// anything not listed here gets a client error before we touch the disk
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "flv", "webm"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaKind {
    Image,
    Video,
}

pub fn media_kind(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

// thumbnail state machine, as observed by clients
//
// Generating is tracked in memory (not derived from disk state) so that
// repeated requests while the worker is busy do not enqueue duplicates
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbStatus {
    FileNotFound,
    NotGenerated,
    Generating,
    Ready,
    Outdated,
    Error,
}

// query parameters shared by the preview and streaming endpoints; paths
// are always relative to the configured media source directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaPathQuery {
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThumbStatusResp {
    pub status: ThumbStatus,
    pub path: String,
}

// body of the 202 response when generation has been accepted but the
// artifact is not yet ready
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratingResp {
    pub status: ThumbStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified: String,
}
