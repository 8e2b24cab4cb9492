//! Header inspection.
//!
//! # Responsibilities
//! - Decide whether a navigation response is eligible for inspection
//! - Find the backend identity header by configured priority
//!
//! # Design Decisions
//! - Sub-frame and non-HTTP responses are never inspected
//! - Values are taken verbatim; an empty value still counts as present

use reqwest::header::HeaderMap;
use url::Url;

use crate::detection::headers::{HeaderNames, ResponseHeader};
use crate::types::{is_http, BackendId, FrameId};

/// Kind of resource a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Other,
}

/// Only top-level documents fetched over HTTP carry a meaningful backend.
pub fn is_inspectable(resource: ResourceType, frame: FrameId, url: &Url) -> bool {
    resource == ResourceType::MainFrame && frame.is_top() && is_http(url)
}

/// Return the value of the highest-priority recognized header.
pub fn extract_backend(headers: &[ResponseHeader], names: &HeaderNames) -> Option<BackendId> {
    names.iter().find_map(|wanted| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(wanted))
            .map(|h| BackendId::new(h.value.clone()))
    })
}

/// Same lookup over a reqwest header map.
///
/// Values that are not visible ASCII are skipped.
pub fn extract_backend_from_map(headers: &HeaderMap, names: &HeaderNames) -> Option<BackendId> {
    names.iter().find_map(|wanted| {
        headers
            .get(wanted)
            .and_then(|v| v.to_str().ok())
            .map(BackendId::from)
    })
}
