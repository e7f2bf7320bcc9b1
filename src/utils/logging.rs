//! Logging utility functions for proxy operations

use crate::log_debug;
use crate::models::Profile;
use hyper::StatusCode;
use std::net::SocketAddr;
use tracing::info;

/// Log incoming request information
pub fn log_incoming_request(method: &str, uri: &str, remote_addr: &SocketAddr, profile: &Profile) {
    if method == "CONNECT" {
        log_debug!("🔐 {} {} from {} [{}]", method, uri, remote_addr.ip(), profile.name);
    } else {
        info!("📥 {} {} from {} [{}]", method, uri, remote_addr.ip(), profile.name);
    }
    log_debug!(
        "🔍 REQUEST DETAILS:\n  Method: {}\n  URI: {}\n  Remote: {}\n  Profile: {:?}",
        method,
        uri,
        remote_addr,
        profile
    );
}

/// Log successful CONNECT tunnel establishment
pub fn log_connect_success(host: &str, port: u16, connect_time: u128) {
    log_debug!("✅ Tunnel established to {}:{} ({}ms)", host, port, connect_time);
}

/// Log failed CONNECT attempt
pub fn log_connect_failure(host: &str, port: u16, connect_time: u128, error: &str) {
    info!("❌ CONNECT failed to {}:{} ({}ms): {}", host, port, connect_time, error);
}

/// Log HTTP request success
pub fn log_http_success(method: &str, uri: &str, status: StatusCode, total_time: u128) {
    info!(
        "✅ {} {} → {} ({}ms to headers)",
        method,
        uri.chars().take(80).collect::<String>(),
        status,
        total_time
    );
}

/// Log HTTP request failure
pub fn log_http_failure(method: &str, uri: &str, total_time: u128, error: &dyn std::fmt::Display) {
    info!(
        "❌ {} {} → ERROR ({}ms): {}",
        method,
        uri.chars().take(80).collect::<String>(),
        total_time,
        error
    );
}
