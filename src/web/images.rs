use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::header::{
    CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED,
};
use axum::http::response::Builder;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use httpdate::{fmt_http_date, parse_http_date};

use crate::constants::{DOWNLOAD_FILENAME_PREFIX, IMAGE_CACHE_CONTROL};
use crate::error::SkygramError;
use crate::storage::read_file;

/// Cache validators derived from a stored image's metadata.
#[derive(Clone, Debug)]
pub(crate) struct ImageCacheHeaders {
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
    modified_at: Option<SystemTime>,
}

impl ImageCacheHeaders {
    pub(crate) fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let modified_at = metadata.modified().ok();
        let etag = build_etag(metadata.len(), modified_at);
        let last_modified =
            modified_at.and_then(|modified| HeaderValue::from_str(&fmt_http_date(modified)).ok());
        Self {
            etag,
            last_modified,
            modified_at,
        }
    }

    fn apply(&self, mut builder: Builder) -> Builder {
        builder = builder.header(CACHE_CONTROL, IMAGE_CACHE_CONTROL.as_str());
        if let Some(etag) = &self.etag {
            builder = builder.header(ETAG, etag.clone());
        }
        if let Some(last_modified) = &self.last_modified {
            builder = builder.header(LAST_MODIFIED, last_modified.clone());
        }
        builder
    }

    /// True when the client's validators say its copy is current.
    pub(crate) fn is_not_modified(&self, headers: &HeaderMap) -> bool {
        // If-None-Match wins over If-Modified-Since when both are sent
        if let Some(if_none_match) = headers.get(IF_NONE_MATCH) {
            let Ok(value) = if_none_match.to_str() else {
                return false;
            };
            let value = value.trim();
            if value == "*" {
                return true;
            }
            return self
                .etag
                .as_ref()
                .and_then(|etag| etag.to_str().ok())
                .is_some_and(|etag| value.split(',').any(|candidate| candidate.trim() == etag));
        }

        if let (Some(if_modified_since), Some(modified_at)) =
            (headers.get(IF_MODIFIED_SINCE), self.modified_at)
            && let Ok(value) = if_modified_since.to_str()
            && let Ok(since) = parse_http_date(value)
        {
            // http dates only carry whole seconds
            return truncate_to_secs(modified_at) <= since;
        }

        false
    }
}

fn truncate_to_secs(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => UNIX_EPOCH + std::time::Duration::from_secs(duration.as_secs()),
        Err(_) => time,
    }
}

fn build_etag(size: u64, modified_at: Option<SystemTime>) -> Option<HeaderValue> {
    let suffix = modified_at
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    HeaderValue::from_str(&format!("W/\"{size}-{suffix}\"")).ok()
}

/// `Content-Disposition` for the download endpoint.
fn attachment_disposition(filename: &str) -> HeaderValue {
    if !filename.is_ascii() {
        return HeaderValue::from_static("attachment");
    }
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{DOWNLOAD_FILENAME_PREFIX}{filename}\""
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// How a stored image should be sent back.
pub(crate) struct ServeImage<'a> {
    pub(crate) path: &'a Path,
    pub(crate) content_type: &'static str,
    /// Set for downloads; the public filename to offer
    pub(crate) download_as: Option<&'a str>,
}

impl ServeImage<'_> {
    /// Reads the file and builds the response, honouring conditional requests.
    pub(crate) async fn respond(
        &self,
        request_headers: &HeaderMap,
    ) -> Result<Response, SkygramError> {
        let (bytes, metadata) = read_file(self.path).await?;
        let cache = ImageCacheHeaders::from_metadata(&metadata);

        let mut builder = cache.apply(Response::builder());
        if let Some(filename) = self.download_as {
            builder = builder.header(CONTENT_DISPOSITION, attachment_disposition(filename));
        }

        if cache.is_not_modified(request_headers) {
            return builder
                .status(StatusCode::NOT_MODIFIED)
                .body(Body::empty())
                .map_err(SkygramError::from);
        }

        builder
            .header(CONTENT_TYPE, self.content_type)
            .body(Body::from(bytes))
            .map_err(SkygramError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_for(bytes: &[u8]) -> (tempfile::TempDir, ImageCacheHeaders) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("img.png");
        std::fs::write(&path, bytes).expect("write");
        let metadata = std::fs::metadata(&path).expect("metadata");
        (dir, ImageCacheHeaders::from_metadata(&metadata))
    }

    #[test]
    fn etag_matches_if_none_match() {
        let (_dir, cache) = cache_for(b"abc");
        let etag = cache.etag.clone().expect("etag");
        assert!(etag.to_str().expect("ascii").starts_with("W/\"3-"));

        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, etag);
        assert!(cache.is_not_modified(&headers));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("W/\"9-9\""));
        assert!(!cache.is_not_modified(&headers));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(cache.is_not_modified(&headers));
    }

    #[test]
    fn if_modified_since_uses_whole_seconds() {
        let (_dir, cache) = cache_for(b"abc");
        let last_modified = cache.last_modified.clone().expect("last modified");

        let mut headers = HeaderMap::new();
        headers.insert(IF_MODIFIED_SINCE, last_modified);
        assert!(cache.is_not_modified(&headers));

        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT"),
        );
        assert!(!cache.is_not_modified(&headers));
        assert!(!cache.is_not_modified(&HeaderMap::new()));
    }

    #[test]
    fn disposition_falls_back_for_odd_names() {
        assert_eq!(
            attachment_disposition("abc_dragon.png"),
            "attachment; filename=\"cloud-art-abc_dragon.png\""
        );
        assert_eq!(attachment_disposition("abc_drag\u{f3}n.png"), "attachment");
    }
}
