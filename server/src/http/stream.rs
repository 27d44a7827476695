use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use http::{
    HeaderMap, HeaderValue,
    header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE},
};
use mime_guess::MimeGuess;
use regex::Regex;
use tokio::{fs::File, io::AsyncReadExt, io::AsyncSeekExt};
use tokio_util::codec::{BytesCodec, FramedRead};
use tracing::{debug, instrument, warn};

use crate::{http::svc::HttpEndpoint, service::GsError};
use api::{MediaPathQuery, media_kind};
use common::media::normalize_path;

// byte-range media streaming
//
// handlers return GsError so that ? works for channel and i/o failures,
// with the status code mapping living in http/error.rs

#[instrument(skip_all)]
pub(super) async fn stream_media(
    headers: HeaderMap,
    State(state): State<Arc<HttpEndpoint>>,
    Query(query): Query<MediaPathQuery>,
) -> Result<Response, GsError> {
    debug!({path = %query.path}, "serving media");

    let rel = normalize_path(&query.path).map_err(|err| GsError::InvalidInput(err.to_string()))?;

    // the extension gate runs before any filesystem access, so unsupported
    // types are a client error even when no such file exists
    if media_kind(std::path::Path::new(&rel)).is_none() {
        return Err(GsError::InvalidInput(format!(
            "unsupported media type: {rel}"
        )));
    }

    let filename = state.config.fs.media_srcdir.join(&rel);

    let mut file_handle = match File::open(&filename).await {
        Ok(f) => f,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(GsError::NotFound(rel));
        }
        Err(err) => return Err(err.into()),
    };

    let length = file_handle.metadata().await?.len();

    let range = match headers.get(RANGE) {
        None => None,
        Some(val) => {
            let val = val
                .to_str()
                .map_err(|_| GsError::InvalidInput(String::from("invalid range header")))?;

            Some(parse_range(&state.range_regex, val, length)?)
        }
    };

    // response headers
    //
    // modern browsers need all of these to be correct for seeking to work,
    // in particular the total length in Content-Range
    let mut headers = HeaderMap::new();

    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    match range {
        None => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        }
        Some((start, end)) => {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(end - start + 1));
            headers.insert(
                CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{length}"))
                    .map_err(|err| GsError::Internal(err.into()))?,
            );
        }
    }

    match MimeGuess::from_path(&filename).first() {
        Some(mime) => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_str(mime.essence_str())
                    .map_err(|err| GsError::Internal(err.into()))?,
            );
        }
        None => warn!("failed to guess mime type"),
    }

    let (code, body) = match range {
        None => (
            StatusCode::OK,
            Body::from_stream(FramedRead::new(file_handle, BytesCodec::new())),
        ),
        Some((start, end)) => {
            file_handle.seek(std::io::SeekFrom::Start(start)).await?;

            // limit the reader, not the chunk stream, so the cutoff is
            // byte-exact regardless of codec buffer sizes
            (
                StatusCode::PARTIAL_CONTENT,
                Body::from_stream(FramedRead::new(
                    file_handle.take(end - start + 1),
                    BytesCodec::new(),
                )),
            )
        }
    };

    Ok((code, headers, body).into_response())
}

// returns the inclusive (start, end) of the single requested range
//
// a header that does not parse is the client's mistake (400), while one
// that parses but cannot be satisfied against this file is 416
fn parse_range(regex: &Regex, ranges: &str, length: u64) -> Result<(u64, u64), GsError> {
    if !ranges.starts_with("bytes=") {
        return Err(GsError::InvalidInput(String::from("invalid range unit")));
    }

    let mut match_iter = regex.captures_iter(ranges).map(|c| c.extract::<2>());

    let (start, end) = match match_iter.next() {
        None => {
            return Err(GsError::InvalidInput(String::from(
                "no byte range specified",
            )));
        }
        Some((_, [s, e])) => {
            let start = s
                .parse::<u64>()
                .map_err(|_| GsError::InvalidInput(String::from("invalid range start")))?;

            let end = match e {
                "" => None,
                e => Some(
                    e.parse::<u64>()
                        .map_err(|_| GsError::InvalidInput(String::from("invalid range end")))?,
                ),
            };

            (start, end)
        }
    };

    if match_iter.next().is_some() {
        return Err(GsError::RangeUnsatisfiable(String::from(
            "multiple ranges unsupported",
        )));
    }

    if start >= length {
        return Err(GsError::RangeUnsatisfiable(format!(
            "range start {start} beyond length {length}"
        )));
    }

    let end = end.unwrap_or(length - 1);

    if end >= length || start > end {
        return Err(GsError::RangeUnsatisfiable(format!(
            "invalid range {start}-{end} for length {length}"
        )));
    }

    Ok((start, end))
}
