//! `Content-Type` resolution for multipart camera streams.
//!
//! Some camera firmwares declare the multipart boundary in a way RFC 2045
//! parsers reject (stray spaces, unquoted separators inside the value). The
//! compliant parse is tried first; the lenient one only runs when it fails.

use std::collections::HashMap;

use tracing::debug;

const BOUNDARY_MARKER: &str = "; boundary=";

/// A parsed media type. `params` always holds a non-empty `boundary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub essence: String,
    pub params: HashMap<String, String>,
}

impl MediaType {
    pub fn boundary(&self) -> &str {
        self.params
            .get("boundary")
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MediaTypeError {
    #[error("no multipart boundary in content type {0:?}")]
    MissingBoundary(String),
    #[error("empty multipart boundary in content type {0:?}")]
    EmptyBoundary(String),
}

/// Resolve the media type and boundary of a multipart `Content-Type` value.
pub fn resolve(content_type: &str) -> Result<MediaType, MediaTypeError> {
    match parse_compliant(content_type) {
        Some(media_type) => Ok(media_type),
        None => {
            debug!(content_type, "content type rejected by strict parser, trying lenient split");
            parse_lenient(content_type)
        }
    }
}

fn parse_compliant(content_type: &str) -> Option<MediaType> {
    let parsed: mime::Mime = content_type.trim().parse().ok()?;
    let params: HashMap<String, String> = parsed
        .params()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                value.as_str().trim_matches('"').to_string(),
            )
        })
        .collect();
    if params.get("boundary").map_or(true, |b| b.is_empty()) {
        return None;
    }
    Some(MediaType {
        essence: parsed.essence_str().to_string(),
        params,
    })
}

/// Normalize separator spacing to `"; "` and take everything after the first
/// boundary marker as the boundary value.
fn parse_lenient(content_type: &str) -> Result<MediaType, MediaTypeError> {
    let normalized = content_type.replace("; ", ";").replace(';', "; ");
    let Some((essence, boundary)) = normalized.split_once(BOUNDARY_MARKER) else {
        return Err(MediaTypeError::MissingBoundary(content_type.to_string()));
    };
    let boundary = boundary.trim().trim_matches('"');
    if boundary.is_empty() {
        return Err(MediaTypeError::EmptyBoundary(content_type.to_string()));
    }

    let mut params = HashMap::new();
    params.insert("boundary".to_string(), boundary.to_string());
    Ok(MediaType {
        essence: essence.trim().to_string(),
        params,
    })
}
