use std::{path::PathBuf, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio;
use toml;
use tracing::{Level, debug, instrument};

// glimpse configuration
//
// this struct contains all of the configuration options used by the server,
// split into subtables to match the service layout
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GsConfig {
    pub http: HttpConfig,
    pub fs: FsConfig,
    pub thumb: ThumbConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HttpConfig {
    // ip and port for the http server
    pub socket: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FsConfig {
    // root of the asset library written by the download pipeline
    //
    // all asset paths in the http api are relative to this directory
    pub media_srcdir: PathBuf,

    // read-write directory for thumbnail artifacts, distinct from the
    // asset root and cleaned independently
    pub cache_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ThumbConfig {
    // frame extraction binary, overridable mostly for testing
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,

    // hard wall-clock bound on a single extraction, in seconds
    //
    // a stalled ffmpeg must not wedge the generation queue
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    // output dimensions; sources are scaled to fit and padded
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,

    // artifacts untouched for this many days are evicted
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
}

impl ThumbConfig {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_timeout() -> u64 {
    30
}

fn default_width() -> u32 {
    200
}

fn default_height() -> u32 {
    150
}

fn default_max_age_days() -> u64 {
    30
}

// in order to extract the config table from a larger document, we need to specify it
// as a subtable of the root node, i.e. a substruct
#[derive(Debug, Deserialize, Serialize)]
struct TomlConfigFile {
    config: GsConfig,
}

#[instrument(level=Level::DEBUG)]
pub async fn read_config(filename: PathBuf) -> Arc<GsConfig> {
    debug!("reading config file");

    let doc = tokio::fs::read_to_string(filename)
        .await
        .expect("failed to read config file");

    let data: TomlConfigFile = match toml::from_str(&doc) {
        Ok(val) => val,
        Err(err) => panic!("failed to parse config file: {err}"),
    };

    debug!("successfully parsed config file");
    Arc::new(data.config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let doc = r#"
            [config.http]
            socket = "127.0.0.1:8081"

            [config.fs]
            media_srcdir = "/srv/media"
            cache_dir = "/var/cache/glimpse"

            [config.thumb]
        "#;

        let data: TomlConfigFile = toml::from_str(doc).unwrap();
        let config = data.config;

        assert_eq!(config.http.socket, "127.0.0.1:8081");
        assert_eq!(config.fs.media_srcdir, PathBuf::from("/srv/media"));
        assert_eq!(config.thumb.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(config.thumb.width, 200);
        assert_eq!(config.thumb.height, 150);
        assert_eq!(config.thumb.timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn thumb_defaults_can_be_overridden() {
        let doc = r#"
            [config.http]
            socket = "0.0.0.0:8081"

            [config.fs]
            media_srcdir = "/srv/media"
            cache_dir = "/var/cache/glimpse"

            [config.thumb]
            ffmpeg = "/usr/local/bin/ffmpeg"
            timeout = 5
            width = 320
            height = 240
            max_age_days = 7
        "#;

        let data: TomlConfigFile = toml::from_str(doc).unwrap();
        let thumb = data.config.thumb;

        assert_eq!(thumb.ffmpeg, PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(thumb.timeout, 5);
        assert_eq!((thumb.width, thumb.height), (320, 240));
        assert_eq!(thumb.max_age_days, 7);
    }
}
