//! HTTP utility functions

use hyper::{Body, HeaderMap, Response, StatusCode, Uri};
use tracing::debug;

/// Check if a header is a hop-by-hop header
pub fn is_hop_by_hop_header(name: &str) -> bool {
    let hop_by_hop_headers = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];

    hop_by_hop_headers.contains(&name.to_lowercase().as_str())
}

/// Copy every end-to-end header from `source` into `target`, keeping
/// repeated headers. Returns (forwarded, skipped).
pub fn copy_end_to_end_headers(source: &HeaderMap, target: &mut HeaderMap) -> (usize, usize) {
    let mut forwarded = 0;
    let mut skipped = 0;

    for (name, value) in source {
        if is_hop_by_hop_header(name.as_str()) {
            skipped += 1;
        } else {
            target.append(name.clone(), value.clone());
            forwarded += 1;
        }
    }

    debug!("Header forwarding: {} forwarded, {} skipped (hop-by-hop)", forwarded, skipped);
    (forwarded, skipped)
}

/// Parse host and port from a CONNECT request target, defaulting to 443
pub fn parse_connect_target(uri: &Uri) -> Result<(String, u16), String> {
    let authority = uri
        .authority()
        .ok_or_else(|| format!("Invalid CONNECT target: {}", uri))?;

    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("Invalid CONNECT target: {}", uri));
    }

    Ok((host.to_string(), authority.port_u16().unwrap_or(443)))
}

/// Build error response
pub fn build_error_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response
}
