use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{Level, debug, instrument, span, warn};

// fixed seek into the source before grabbing the frame, so we skip any
// black lead-in without scanning the whole file
const FRAME_SEEK_OFFSET: &str = "00:00:01";

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// frame extraction error taxonomy
//
// BinaryMissing is the one non-retryable case: the worker uses it to mark
// the capability globally unavailable instead of respawning uselessly
#[derive(Debug)]
pub enum ExtractError {
    BinaryMissing,
    Timeout,
    Failed(String),
    Io(std::io::Error),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::BinaryMissing => write!(f, "frame extraction binary not found"),
            ExtractError::Timeout => write!(f, "frame extraction timed out"),
            ExtractError::Failed(diag) => write!(f, "frame extraction failed: {diag}"),
            ExtractError::Io(err) => write!(f, "frame extraction io error: {err}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Io(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FrameOptions {
    pub ffmpeg: PathBuf,
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
}

// scratch directory cleanup on every exit path
//
// extraction output lands in a private per-request directory; whoever wants
// the frame renames it out before this guard drops
#[derive(Debug)]
pub struct ScratchGuard {
    dir: PathBuf,
}

impl ScratchGuard {
    pub fn new(dir: PathBuf) -> Self {
        ScratchGuard { dir }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            // extraction can fail before the directory is ever created
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(_) => {
                let _ = span!(Level::INFO, "scratch_guard_drop").entered();
                warn!("failed to clean up scratch directory");
            }
        }
    }
}

// check that the extraction binary exists and runs at all, without touching
// any media
#[instrument]
pub async fn probe_extractor(ffmpeg: &Path) -> bool {
    let mut cmd = Command::new(ffmpeg);

    cmd.arg("-version").kill_on_drop(true);

    matches!(
        timeout(PROBE_TIMEOUT, cmd.output()).await,
        Ok(Ok(output)) if output.status.success()
    )
}

// extract exactly one frame from the source into the scratch directory,
// scaled and padded to the configured output size
//
// the timeout bounds worker stall time: on expiry the future is dropped and
// kill_on_drop reaps the child
#[instrument(skip(opts))]
pub async fn extract_frame(
    src: &Path,
    scratch_dir: &Path,
    opts: &FrameOptions,
) -> Result<PathBuf, ExtractError> {
    debug!("starting frame extraction");

    tokio::fs::create_dir_all(scratch_dir)
        .await
        .map_err(ExtractError::Io)?;

    let frame_path = scratch_dir.join("frame.jpg");

    let filter = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
        w = opts.width,
        h = opts.height
    );

    let mut cmd = Command::new(&opts.ffmpeg);

    cmd.args(["-ss", FRAME_SEEK_OFFSET])
        .args(["-i", &src.to_string_lossy()])
        .args(["-frames:v", "1"])
        .args(["-vf", &filter])
        .arg("-y")
        .arg(&frame_path)
        .kill_on_drop(true);

    let output = match timeout(opts.timeout, cmd.output()).await {
        Err(_) => return Err(ExtractError::Timeout),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractError::BinaryMissing);
        }
        Ok(Err(err)) => return Err(ExtractError::Io(err)),
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(ExtractError::Failed(decode_diagnostics(&output.stderr)));
    }

    if !matches!(tokio::fs::try_exists(&frame_path).await, Ok(true)) {
        return Err(ExtractError::Failed(String::from(
            "extractor exited cleanly but wrote no frame",
        )));
    }

    debug!("finished frame extraction");

    Ok(frame_path)
}

// ffmpeg diagnostics are not guaranteed to be valid utf-8 in every locale,
// and garbled stderr must never fail the extraction on its own
fn decode_diagnostics(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_tolerate_bad_encodings() {
        assert_eq!(decode_diagnostics(b"plain error"), "plain error");

        // invalid utf-8 falls back to lossy decoding instead of failing
        let garbled = decode_diagnostics(&[0x66, 0x6f, 0xff, 0xfe, 0x6f]);
        assert!(garbled.contains("fo"));
        assert!(garbled.contains('\u{fffd}'));
    }

    #[tokio::test]
    async fn missing_binary_reports_binary_missing() {
        let dir = tempfile::tempdir().unwrap();

        let opts = FrameOptions {
            ffmpeg: PathBuf::from("/nonexistent/glimpse-test-ffmpeg"),
            width: 200,
            height: 150,
            timeout: Duration::from_secs(5),
        };

        let res = extract_frame(
            &dir.path().join("clip.mp4"),
            &dir.path().join("scratch"),
            &opts,
        )
        .await;

        assert!(matches!(res, Err(ExtractError::BinaryMissing)));
    }

    #[tokio::test]
    async fn missing_binary_probe_fails() {
        assert!(!probe_extractor(Path::new("/nonexistent/glimpse-test-ffmpeg")).await);
    }

    // counts warn-level events so the tests can assert on logging behavior
    struct WarnCounter(std::sync::atomic::AtomicUsize);

    impl tracing::Subscriber for WarnCounter {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }

        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }

        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}

        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}

        fn event(&self, event: &tracing::Event<'_>) {
            if *event.metadata().level() == Level::WARN {
                self.0
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }

        fn enter(&self, _: &tracing::span::Id) {}

        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn scratch_guard_is_quiet_when_directory_never_existed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("never-created");

        let counter = std::sync::Arc::new(WarnCounter(std::sync::atomic::AtomicUsize::new(0)));

        tracing::subscriber::with_default(std::sync::Arc::clone(&counter), || {
            drop(ScratchGuard::new(missing.clone()));
        });

        assert_eq!(counter.0.load(std::sync::atomic::Ordering::Relaxed), 0);
        assert!(!missing.exists());
    }

    #[tokio::test]
    async fn scratch_guard_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");

        tokio::fs::create_dir_all(&scratch).await.unwrap();
        tokio::fs::write(scratch.join("frame.jpg"), b"partial")
            .await
            .unwrap();

        drop(ScratchGuard::new(scratch.clone()));

        assert!(!scratch.exists());
    }
}
