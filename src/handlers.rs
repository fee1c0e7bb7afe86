use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header, HeaderValue, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
};
use futures::StreamExt;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::FileServerError;
use crate::listing;
use crate::paths::{query_path, request_path, resolve, Resolved};
use crate::plain::PlainTextReader;
use crate::AppState;

/// GET / and GET /{path} - File bytes or directory index
///
/// The path is taken from the request URI itself and decoded once, so
/// reserved characters that were percent-encoded in a name (`%3F`, `%23`)
/// stay part of that name.
pub async fn serve_path(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<Response, FileServerError> {
    let request = request_path(&uri);

    match resolve(&state.root, request).await? {
        Resolved::Missing(path) => Err(FileServerError::NotFound(state.root.relative(&path))),
        Resolved::Directory(dir) => {
            let root = state.root.clone();
            let show_hidden = state.config.show_hidden;

            let html = tokio::task::spawn_blocking(move || {
                listing::render_directory(&root, &dir, show_hidden)
            })
            .await
            .map_err(|err| {
                FileServerError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
            })??;

            Ok(Html(html).into_response())
        }
        Resolved::File(path) => stream_file(&state, &path).await,
    }
}

/// Open `path` for reading, giving up after the configured read timeout.
async fn open_file(
    state: &AppState,
    path: &Path,
    relative: &str,
) -> Result<fs::File, FileServerError> {
    tokio::time::timeout(state.config.read_timeout(), fs::File::open(path))
        .await
        .map_err(|_| {
            warn!("Timed out opening {}", path.display());
            FileServerError::Timeout
        })?
        .map_err(|e| FileServerError::from_io(e, relative))
}

/// Stream a file without loading it into memory. Dropping the body (client
/// went away) drops the reader and closes the file.
async fn stream_file(state: &AppState, path: &Path) -> Result<Response, FileServerError> {
    let relative = state.root.relative(path);
    debug!("Streaming file: {}", path.display());

    let metadata = fs::metadata(path)
        .await
        .map_err(|e| FileServerError::from_io(e, &relative))?;
    let file_size = metadata.len();

    let file = open_file(state, path, &relative).await?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    // Quotes would terminate the Content-Disposition value
    let safe_filename = file_name.replace('"', "'");

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, file_size.to_string()),
        ],
        body,
    )
        .into_response();

    if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", safe_filename)) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

/// GET /_special/view_plain?path=... - File contents as UTF-8 text
///
/// Invalid UTF-8 sequences are replaced with U+FFFD rather than failing. The
/// file is streamed; every read is bounded by the configured read timeout.
/// Opening the file and the first read happen before the response starts, so
/// a file that cannot be read at all still gets a proper error status.
pub async fn view_plain(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, FileServerError> {
    let request: PathBuf = query
        .as_deref()
        .and_then(|query| query_path(query, "path"))
        .ok_or_else(|| FileServerError::BadRequest("missing 'path' query parameter".to_string()))?;

    let path = match resolve(&state.root, request).await? {
        Resolved::Missing(path) => {
            return Err(FileServerError::NotFound(state.root.relative(&path)));
        }
        Resolved::Directory(_) => return Err(FileServerError::NotAFile),
        Resolved::File(path) => path,
    };

    let relative = state.root.relative(&path);
    debug!("Reading file as plain text: {}", path.display());

    let file = open_file(&state, &path, &relative).await?;
    let mut reader = PlainTextReader::new(file, state.config.read_timeout());

    let first = reader.next_chunk().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::TimedOut {
            warn!("Timed out reading {}", path.display());
        }
        FileServerError::from_io(e, &relative)
    })?;

    let body = futures::stream::iter(first.map(Ok)).chain(reader.into_stream());

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}
