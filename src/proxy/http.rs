//! Plain HTTP forwarding
//!
//! One request/response exchange with the origin. Only the response body is
//! shaped, at the profile's download rate.

use futures::TryStreamExt;
use hyper::{Body, Request, Response, StatusCode};
use std::io;
use std::time::Instant;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::error::{Error, Result};
use crate::logging::log_transfer;
use crate::models::{Profile, TransferKind, TransferLog};
use crate::proxy::http_client::HttpClient;
use crate::throttle::{relay, RELAY_CHUNK_SIZE};
use crate::utils::{build_error_response, copy_end_to_end_headers, log_http_failure, log_http_success};
use crate::log_debug;

/// Handle a non-CONNECT request.
///
/// The profile is captured by the caller once; a later switch does not touch
/// this exchange.
pub async fn handle_http_request(req: Request<Body>, profile: Profile, client: &HttpClient) -> Response<Body> {
    let start_time = Instant::now();

    if profile.latency_ms > 0 {
        tokio::time::sleep(profile.latency()).await;
    }

    let method = req.method().to_string();
    let uri = req.uri().to_string();

    let outbound = match build_forwarding_request(req) {
        Ok(outbound) => outbound,
        Err(e) => {
            log_http_failure(&method, &uri, start_time.elapsed().as_millis(), &e);
            return build_error_response(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    let upstream = match client.request(outbound).await {
        Ok(upstream) => upstream,
        Err(e) => {
            log_http_failure(&method, &uri, start_time.elapsed().as_millis(), &e);
            return build_error_response(StatusCode::BAD_GATEWAY, "upstream error");
        }
    };
    log_http_success(&method, &uri, upstream.status(), start_time.elapsed().as_millis());

    let (parts, body) = upstream.into_parts();
    let mut response = Response::new(shape_body(body, uri, profile));
    *response.status_mut() = parts.status;
    *response.version_mut() = hyper::Version::HTTP_11;
    copy_end_to_end_headers(&parts.headers, response.headers_mut());
    response
}

/// Rebuild the inbound request for the origin: same method, target and
/// end-to-end headers; the body is streamed through untouched.
pub fn build_forwarding_request(req: Request<Body>) -> Result<Request<Body>> {
    let (parts, body) = req.into_parts();

    // Absolute-form is the only way to know where to forward to
    if parts.uri.scheme().is_none() || parts.uri.authority().is_none() {
        return Err(Error::InvalidRequest(format!("not an absolute URI: {}", parts.uri)));
    }

    let mut outbound = Request::builder()
        .method(parts.method)
        .uri(parts.uri)
        .body(body)?;
    copy_end_to_end_headers(&parts.headers, outbound.headers_mut());

    log_debug!("Forward request built: {} {}", outbound.method(), outbound.uri());
    Ok(outbound)
}

/// Pump the upstream body through the relay into a pipe whose other end
/// becomes the client body.
fn shape_body(upstream: Body, target: String, profile: Profile) -> Body {
    let (mut writer, reader) = tokio::io::duplex(RELAY_CHUNK_SIZE * 2);

    tokio::spawn(async move {
        let mut source = StreamReader::new(upstream.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));
        let mut record = TransferLog::new(TransferKind::Http, target, &profile);

        match relay(&mut writer, &mut source, profile.download_bytes_per_sec).await {
            Ok(copied) => record.bytes_down = copied,
            Err(e) => {
                record.bytes_down = e.copied;
                record.error = Some(e.to_string());
            }
        }

        log_transfer(&record.finish());
    });

    Body::wrap_stream(ReaderStream::new(reader))
}
