use std::{
    fs::{canonicalize, create_dir, exists, read, read_dir, remove_file, write},
    path::PathBuf,
    sync::Arc,
};

use anyhow;
use rand::random;

use common::config::GsConfig;

// startup sanity checks
//
// these run before any service starts so that a misconfigured deployment
// fails immediately instead of on the first request

pub fn create_temp_file(dir: &PathBuf) -> anyhow::Result<()> {
    // needed to be completely unambiguous which directory we are checking
    if !dir.is_absolute() {
        return Err(anyhow::Error::msg(
            "must pass absolute path to create_temp_file",
        ));
    }

    if !(&canonicalize(dir)? == dir) {
        return Err(anyhow::Error::msg(
            "must pass canonical path to create_temp_file",
        ));
    }

    // this ensures that we create a new file
    let mut filename = dir.join(random::<i64>().to_string());
    let mut count = 0;

    while exists(&filename)? {
        filename = dir.join(random::<i64>().to_string());

        if count < 10 {
            count += 1;
        } else {
            return Err(anyhow::Error::msg(format!(
                "create_temp_file failed to find unique filename ten times for directory {dir:?}"
            )));
        }
    }

    // mock data to make sure that we can read any file we create
    let data = random::<i64>().to_ne_bytes();

    write(&filename, data)?;

    if read(&filename)? != data {
        return Err(anyhow::Error::msg(format!(
            "data readback failed on {filename:?}"
        )));
    }

    remove_file(&filename)?;

    Ok(())
}

// the media source tree only ever needs to be readable
pub fn dir_readable(dir: &PathBuf) -> anyhow::Result<()> {
    if !dir.is_absolute() {
        return Err(anyhow::Error::msg(
            "must pass absolute path to dir_readable",
        ));
    }

    read_dir(dir)?;

    Ok(())
}

pub fn subdir_exists(config: &Arc<GsConfig>, subdir: &str) -> anyhow::Result<()> {
    let subdir = PathBuf::from(subdir);

    if subdir.is_absolute() {
        return Err(anyhow::Error::msg(format!(
            "INTERNAL ERROR: constant {subdir:?} is an absolute path",
        )));
    }

    let full_subdir = config.fs.cache_dir.join(subdir);

    if !exists(&full_subdir)? {
        create_dir(&full_subdir)?;
    }

    create_temp_file(&full_subdir)
}

#[cfg(test)]
mod tests {
    use super::*;

    use common::config::{FsConfig, HttpConfig, ThumbConfig};

    #[test]
    fn temp_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = canonicalize(dir.path()).unwrap();

        create_temp_file(&path).unwrap();

        // nothing left behind
        assert!(read_dir(&path).unwrap().next().is_none());
    }

    #[test]
    fn temp_file_rejects_relative_paths() {
        assert!(create_temp_file(&PathBuf::from("relative/dir")).is_err());
    }

    #[test]
    fn scratch_subdir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = canonicalize(dir.path()).unwrap();

        let config = Arc::new(GsConfig {
            http: HttpConfig {
                socket: String::from("127.0.0.1:0"),
            },
            fs: FsConfig {
                media_srcdir: PathBuf::from("/nonexistent"),
                cache_dir: cache_dir.clone(),
            },
            thumb: ThumbConfig {
                ffmpeg: PathBuf::from("ffmpeg"),
                timeout: 30,
                width: 200,
                height: 150,
                max_age_days: 30,
            },
        });

        subdir_exists(&config, api::SCRATCH_PATH).unwrap();
        assert!(cache_dir.join(api::SCRATCH_PATH).is_dir());

        // idempotent for an existing directory
        subdir_exists(&config, api::SCRATCH_PATH).unwrap();
    }
}
