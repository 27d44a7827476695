use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use http::{HeaderValue, header::CONTENT_TYPE};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::{
    http::svc::HttpEndpoint,
    service::GsError,
    thumb::msg::ThumbMsg,
};
use api::{
    AssetEntry, GeneratingResp, MediaKind, MediaPathQuery, ThumbStatus, ThumbStatusResp,
    media_kind,
};
use common::media::{image::create_image_thumbnail, normalize_path};

// http api endpoints
//
// the thumbnail handlers are one-to-one with the thumbnail service
// messages; the http layer's job is only to translate statuses into
// response codes and to decide which media kinds take which path
//
// image previews are cheap enough to produce inline, so only videos go
// through the cache and its background worker

#[instrument(skip_all)]
pub(super) async fn get_thumbnail(
    State(state): State<Arc<HttpEndpoint>>,
    Query(query): Query<MediaPathQuery>,
) -> Result<Response, GsError> {
    debug!({path = %query.path}, "serving thumbnail");

    let rel = normalize_path(&query.path).map_err(|err| GsError::InvalidInput(err.to_string()))?;

    match media_kind(Path::new(&rel)) {
        None => Err(GsError::InvalidInput(format!(
            "unsupported media type: {rel}"
        ))),
        Some(MediaKind::Image) => image_thumbnail(state, rel).await,
        Some(MediaKind::Video) => video_thumbnail(state, rel).await,
    }
}

async fn image_thumbnail(state: Arc<HttpEndpoint>, rel: String) -> Result<Response, GsError> {
    let filename = state.config.fs.media_srcdir.join(&rel);

    if !tokio::fs::try_exists(&filename).await? {
        return Err(GsError::NotFound(rel));
    }

    let (width, height) = (state.config.thumb.width, state.config.thumb.height);

    // the decoder is synchronous, so it goes on the blocking pool
    let bytes = tokio::task::spawn_blocking(move || create_image_thumbnail(filename, width, height))
        .await
        .map_err(|err| GsError::Internal(err.into()))??;

    Ok(jpeg_response(StatusCode::OK, bytes))
}

async fn video_thumbnail(state: Arc<HttpEndpoint>, rel: String) -> Result<Response, GsError> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    state
        .thumb_svc_sender
        .send(
            ThumbMsg::Status {
                resp: tx,
                path: rel.clone(),
            }
            .into(),
        )
        .await?;

    let status = rx.await??;

    match status {
        ThumbStatus::FileNotFound => Err(GsError::NotFound(rel)),
        ThumbStatus::Error => Err(GsError::Unavailable(String::from(
            "thumbnail generation unavailable",
        ))),
        ThumbStatus::Ready => {
            let (tx, rx) = tokio::sync::oneshot::channel();

            state
                .thumb_svc_sender
                .send(
                    ThumbMsg::GetArtifact {
                        resp: tx,
                        path: rel.clone(),
                    }
                    .into(),
                )
                .await?;

            match rx.await?? {
                Some(bytes) => Ok(jpeg_response(StatusCode::OK, bytes)),
                // evicted between the status check and the read
                None => enqueue(state, rel).await,
            }
        }
        ThumbStatus::Generating => Ok(accepted_response()),
        ThumbStatus::NotGenerated | ThumbStatus::Outdated => enqueue(state, rel).await,
    }
}

async fn enqueue(state: Arc<HttpEndpoint>, rel: String) -> Result<Response, GsError> {
    let (tx, rx) = tokio::sync::oneshot::channel();

    state
        .thumb_svc_sender
        .send(ThumbMsg::RequestGeneration { resp: tx, path: rel }.into())
        .await?;

    if rx.await?? {
        Ok(accepted_response())
    } else {
        // the asset was present a moment ago, so a refusal means the
        // extractor is gone rather than the file
        Err(GsError::Unavailable(String::from(
            "thumbnail generation unavailable",
        )))
    }
}

fn jpeg_response(code: StatusCode, bytes: Vec<u8>) -> Response {
    let mut headers = http::HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));

    (code, headers, bytes).into_response()
}

fn accepted_response() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(GeneratingResp {
            status: ThumbStatus::Generating,
        }),
    )
        .into_response()
}

// only videos have cache state worth polling; images are always produced
// inline, so asking for their status is a malformed request
#[instrument(skip_all)]
pub(super) async fn get_thumbnail_status(
    State(state): State<Arc<HttpEndpoint>>,
    Query(query): Query<MediaPathQuery>,
) -> Result<Response, GsError> {
    let rel = normalize_path(&query.path).map_err(|err| GsError::InvalidInput(err.to_string()))?;

    if media_kind(Path::new(&rel)) != Some(MediaKind::Video) {
        return Err(GsError::InvalidInput(format!(
            "thumbnail status is only tracked for videos: {rel}"
        )));
    }

    let (tx, rx) = tokio::sync::oneshot::channel();

    state
        .thumb_svc_sender
        .send(
            ThumbMsg::Status {
                resp: tx,
                path: rel.clone(),
            }
            .into(),
        )
        .await?;

    let status = rx.await??;

    Ok(Json(ThumbStatusResp { status, path: rel }).into_response())
}

#[instrument(skip_all)]
pub(super) async fn list_assets(
    State(state): State<Arc<HttpEndpoint>>,
) -> Result<Response, GsError> {
    let srcdir = state.config.fs.media_srcdir.clone();
    let cache_dir = state.config.fs.cache_dir.clone();

    // walkdir is synchronous, and large libraries can take a while
    let entries = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<AssetEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&srcdir).follow_links(false) {
            let entry = entry?;

            if !entry.file_type().is_file() || entry.path().starts_with(&cache_dir) {
                continue;
            }

            if media_kind(entry.path()).is_none() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&srcdir)?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let meta = entry.metadata()?;

            entries.push(AssetEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path: rel,
                size: meta.len(),
                modified: DateTime::<Utc>::from(meta.modified()?).to_rfc3339(),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(entries)
    })
    .await
    .map_err(|err| GsError::Internal(err.into()))??;

    Ok(Json(entries).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path as StdPath;

    use crate::service::{GsInner, GsmRegistry, ServiceType};
    use crate::thumb::svc::ThumbRunner;
    use common::config::{FsConfig, GsConfig, HttpConfig, ThumbConfig};

    // 1x1 transparent png
    const PNG_PIXEL: &[u8] = &[
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
        0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
    ];

    fn test_config(root: &StdPath) -> Arc<GsConfig> {
        let media_srcdir = root.join("media");
        let cache_dir = root.join("cache");

        std::fs::create_dir_all(&media_srcdir).unwrap();
        std::fs::create_dir_all(cache_dir.join(api::SCRATCH_PATH)).unwrap();

        Arc::new(GsConfig {
            http: HttpConfig {
                socket: String::from("127.0.0.1:0"),
            },
            fs: FsConfig {
                media_srcdir,
                cache_dir,
            },
            thumb: ThumbConfig {
                ffmpeg: std::path::PathBuf::from("ffmpeg"),
                timeout: 30,
                width: 200,
                height: 150,
                max_age_days: 30,
            },
        })
    }

    // wires a live thumbnail responder to the endpoint, without the worker,
    // so requests queue but never complete
    fn endpoint(config: Arc<GsConfig>) -> Arc<HttpEndpoint> {
        let registry = GsmRegistry::new();

        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        registry.insert(ServiceType::Thumb, tx).unwrap();

        let runner = Arc::new(ThumbRunner::new(config.clone(), registry.clone()).unwrap());

        tokio::task::spawn(async move {
            while let Some(msg) = rx.recv().await {
                runner.message_handler(msg).await.ok();
            }
        });

        Arc::new(HttpEndpoint::new(config, registry).unwrap())
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn image_thumbnail_is_produced_inline() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        std::fs::write(config.fs.media_srcdir.join("pixel.png"), PNG_PIXEL).unwrap();

        let state = endpoint(config);

        let resp = get_thumbnail(
            State(Arc::clone(&state)),
            Query(MediaPathQuery {
                path: String::from("pixel.png"),
            }),
        )
        .await
        .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(CONTENT_TYPE).unwrap(), "image/jpeg");

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[0..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn video_thumbnail_request_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        std::fs::write(config.fs.media_srcdir.join("clip.mp4"), b"video").unwrap();

        let state = endpoint(config);

        let status_query = Query(MediaPathQuery {
            path: String::from("clip.mp4"),
        });

        let resp = get_thumbnail_status(State(Arc::clone(&state)), status_query.clone())
            .await
            .unwrap();
        assert_eq!(
            body_json(resp).await["status"],
            serde_json::json!("not_generated")
        );

        let resp = get_thumbnail(State(Arc::clone(&state)), status_query.clone())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["status"], serde_json::json!("generating"));

        // still queued, since no worker is draining
        let resp = get_thumbnail_status(State(Arc::clone(&state)), status_query)
            .await
            .unwrap();
        assert_eq!(
            body_json(resp).await["status"],
            serde_json::json!("generating")
        );
    }

    #[tokio::test]
    async fn missing_video_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = endpoint(test_config(dir.path()));

        assert!(matches!(
            get_thumbnail(
                State(Arc::clone(&state)),
                Query(MediaPathQuery {
                    path: String::from("absent.mp4"),
                }),
            )
            .await,
            Err(GsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn status_of_non_video_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = endpoint(test_config(dir.path()));

        assert!(matches!(
            get_thumbnail_status(
                State(Arc::clone(&state)),
                Query(MediaPathQuery {
                    path: String::from("photo.jpg"),
                }),
            )
            .await,
            Err(GsError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn asset_listing_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        std::fs::write(config.fs.media_srcdir.join("clip.mp4"), b"video").unwrap();
        std::fs::write(config.fs.media_srcdir.join("photo.jpg"), b"image").unwrap();
        std::fs::write(config.fs.media_srcdir.join("notes.txt"), b"text").unwrap();

        std::fs::create_dir_all(config.fs.media_srcdir.join("trips")).unwrap();
        std::fs::write(config.fs.media_srcdir.join("trips/beach.mkv"), b"video").unwrap();

        let state = endpoint(config);

        let resp = list_assets(State(Arc::clone(&state))).await.unwrap();
        let body = body_json(resp).await;

        let paths: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();

        assert_eq!(paths, vec!["clip.mp4", "photo.jpg", "trips/beach.mkv"]);

        assert_eq!(body[2]["name"], serde_json::json!("beach.mkv"));
        assert_eq!(body[0]["size"], serde_json::json!(5));
        assert!(body[0]["modified"].as_str().unwrap().contains('T'));
    }
}
