use anyhow::Result;
use sha2::{Digest, Sha256};

pub mod image;
pub mod video;

// path normalization
//
// asset paths arrive from the http api with whatever separators the client
// used, and they are joined onto the asset root, so we refuse anything that
// could escape it
pub fn normalize_path(path: &str) -> Result<String> {
    let path = path.replace('\\', "/");

    if path.is_empty() {
        return Err(anyhow::Error::msg("empty asset path"));
    }

    if path.starts_with('/') {
        return Err(anyhow::Error::msg("absolute asset path"));
    }

    if path.split('/').any(|seg| seg == "..") {
        return Err(anyhow::Error::msg("asset path contains traversal segment"));
    }

    Ok(path)
}

// cache key resolution
//
// the artifact filename is a stable hash of the normalized logical path, so
// the same asset always maps to the same cache slot; collisions are treated
// as astronomically unlikely
pub fn cache_key(path: &str) -> Result<String> {
    let normalized = normalize_path(path)?;

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}
