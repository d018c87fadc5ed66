//! HTTP request handlers: service descriptions, SOAP control endpoints,
//! and media byte streaming with range semantics.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::cds::actions::{dispatch_action, fault_envelope};
use crate::cds::scpd::{device_description as description_xml, CDS_SCPD, CMS_SCPD};
use crate::cms;
use crate::error::AppError;
use crate::media::Resource;
use crate::seekrange::{BytesRange, TimeSeekRange};
use crate::state::AppState;
use crate::web::headers::DlnaHeaders;

const XML_CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";
const STREAM_CHUNK: usize = 64 * 1024;

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, XML_CONTENT_TYPE)], body).into_response()
}

pub async fn device_description(State(state): State<AppState>) -> Response {
    xml_response(
        StatusCode::OK,
        description_xml(&state.config.server.announce_as, &state.config.server.uuid),
    )
}

pub async fn cds_scpd() -> Response {
    xml_response(StatusCode::OK, CDS_SCPD.to_string())
}

pub async fn cms_scpd() -> Response {
    xml_response(StatusCode::OK, CMS_SCPD.to_string())
}

/// ContentDirectory control endpoint. UPnP-level failures become SOAP
/// fault envelopes on a 500, per the action contract.
pub async fn cds_control(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AppError> {
    let dlna = DlnaHeaders::parse(&headers)?;
    let action = dlna.soap_action.ok_or(AppError::BadRequest)?;
    debug!("CDS control: {action}");

    let tree = state.tree.read().await;
    let response = dispatch_action(
        &tree,
        &state.didl_context(),
        &action,
        &body,
        state.config.server.samsung_extensions,
    );
    Ok(match response {
        Ok(xml) => xml_response(StatusCode::OK, xml),
        Err(e) => {
            info!("CDS action failed: {} ({})", e, e.code());
            xml_response(StatusCode::INTERNAL_SERVER_ERROR, fault_envelope(e))
        }
    })
}

/// ConnectionManager control endpoint; constant-shaped responses only.
pub async fn cms_control(
    State(_state): State<AppState>,
    headers: HeaderMap,
    _body: String,
) -> Result<Response, AppError> {
    let dlna = DlnaHeaders::parse(&headers)?;
    let action = dlna.soap_action.ok_or(AppError::BadRequest)?;
    debug!("CMS control: {action}");

    Ok(match cms::dispatch_action(&action) {
        Ok(xml) => xml_response(StatusCode::OK, xml),
        Err(e) => xml_response(StatusCode::INTERNAL_SERVER_ERROR, fault_envelope(e)),
    })
}

/// Event subscription endpoints: GENA is not supported.
pub async fn event_not_implemented() -> AppError {
    AppError::NotImplemented
}

/// Everything that is not a fixed endpoint: either `/<item-id>.<ext>`
/// media, or a file under the document root.
pub async fn serve_resource(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(AppError::NotFound);
    }
    let dlna = DlnaHeaders::parse(&headers)?;
    let path = uri.path().trim_start_matches('/');

    if let Some((stem, _ext)) = path.split_once('.') {
        if stem.len() == 32 && stem.bytes().all(|b| b.is_ascii_hexdigit()) {
            let resource = {
                let tree = state.tree.read().await;
                tree.item_resource(stem)
            };
            if let Some(resource) = resource {
                debug!("streaming item {stem} from {}", resource.path.display());
                return stream_media(&resource, &dlna).await;
            }
        }
    }

    serve_doc_root(&state.config.server.doc_root_path, path, &dlna).await
}

/// Resolve a request path inside the document root, refusing traversal.
fn resolve_under_root(doc_root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    if request_path.is_empty() {
        return None;
    }
    Some(doc_root.join(relative))
}

async fn serve_doc_root(
    doc_root: &Path,
    request_path: &str,
    dlna: &DlnaHeaders,
) -> Result<Response, AppError> {
    let full = resolve_under_root(doc_root, request_path).ok_or(AppError::NotFound)?;
    let meta = tokio::fs::metadata(&full)
        .await
        .map_err(|_| AppError::NotFound)?;
    if !meta.is_file() {
        return Err(AppError::NotFound);
    }
    // Without a probed duration a time-based seek cannot be satisfied.
    if dlna.time_seek.is_some() {
        return Err(AppError::RangeNotSatisfiable);
    }
    let span = byte_span(meta.len(), dlna.range.as_ref())?;
    stream_file(&full, meta.len(), guess_mime(&full), span, None).await
}

async fn stream_media(resource: &Resource, dlna: &DlnaHeaders) -> Result<Response, AppError> {
    let span = if dlna.range.is_some() {
        byte_span(resource.size, dlna.range.as_ref())?
    } else if let Some(tsr) = &dlna.time_seek {
        Some(time_seek_span(resource, tsr)?)
    } else {
        None
    };

    let features = dlna.content_features.then(|| {
        format!(
            "DLNA.ORG_PN={};DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01500000000000000000000000000000",
            resource.profile.name()
        )
    });
    stream_file(&resource.path, resource.size, resource.mime(), span, features).await
}

/// Turn a parsed byte range into a concrete `[start, end]` span. The
/// grammar accepts shapes like `bytes=1-0`; their meaning is judged here,
/// against the actual resource size.
fn byte_span(size: u64, range: Option<&BytesRange>) -> Result<Option<(u64, u64)>, AppError> {
    let Some(range) = range else {
        return Ok(None);
    };
    if size == 0 {
        return Err(AppError::RangeNotSatisfiable);
    }
    match *range {
        BytesRange::Open { first } => {
            if first >= size {
                return Err(AppError::RangeNotSatisfiable);
            }
            Ok(Some((first, size - 1)))
        }
        BytesRange::Closed { first, last } => {
            if first >= size || first > last {
                return Err(AppError::RangeNotSatisfiable);
            }
            Ok(Some((first, last.min(size - 1))))
        }
    }
}

/// Map an npt range onto bytes through the resource's duration/size ratio.
fn time_seek_span(resource: &Resource, tsr: &TimeSeekRange) -> Result<(u64, u64), AppError> {
    let duration = resource
        .duration_micros
        .filter(|d| *d > 0)
        .ok_or(AppError::RangeNotSatisfiable)?;
    let size = resource.size;
    if size == 0 {
        return Err(AppError::RangeNotSatisfiable);
    }

    let to_byte = |micros: u64| -> u64 {
        ((micros as u128 * size as u128) / duration as u128) as u64
    };

    let start_micros = tsr
        .start
        .as_micros()
        .ok_or(AppError::RangeNotSatisfiable)?;
    let start = to_byte(start_micros);
    if start >= size {
        return Err(AppError::RangeNotSatisfiable);
    }

    let end = match tsr.end.and_then(|e| e.as_micros()) {
        Some(end_micros) => {
            let end = to_byte(end_micros).saturating_sub(1).min(size - 1);
            if end < start {
                return Err(AppError::RangeNotSatisfiable);
            }
            end
        }
        None => size - 1,
    };
    Ok((start, end))
}

async fn stream_file(
    path: &Path,
    size: u64,
    mime: &str,
    span: Option<(u64, u64)>,
    content_features: Option<String>,
) -> Result<Response, AppError> {
    let (start, end) = span.unwrap_or((0, size.saturating_sub(1)));
    let len = if size == 0 { 0 } else { end - start + 1 };

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, mime)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, len);

    let partial = len < size;
    if partial {
        builder = builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(
                header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{size}"),
            );
    } else {
        builder = builder.status(StatusCode::OK);
    }
    if let Some(features) = content_features {
        builder = builder.header("contentFeatures.dlna.org", features);
    }

    let mut file = File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::NotFound,
        _ => AppError::Io(e),
    })?;
    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    let stream = ReaderStream::with_capacity(file.take(len), STREAM_CHUNK);
    Ok(builder.body(Body::from_stream(stream))?)
}

fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("xml") => "text/xml",
        Some("html") | Some("htm") => "text/html",
        Some("txt") => "text/plain",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp3") => "audio/mpeg",
        Some("mpg") | Some("mpeg") => "video/mpeg",
        _ => "application/octet-stream",
    }
}
