use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A named network condition: latency plus per-direction byte rates.
///
/// Rates are bytes per second; `0` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub level: i64,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub download_bytes_per_sec: u64,
    #[serde(default)]
    pub upload_bytes_per_sec: u64,
}

impl Profile {
    pub fn new(
        name: impl Into<String>,
        level: i64,
        latency_ms: u64,
        download_bytes_per_sec: u64,
        upload_bytes_per_sec: u64,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            latency_ms,
            download_bytes_per_sec,
            upload_bytes_per_sec,
        }
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// The stock tiers, worst to best.
    pub fn default_profiles() -> Vec<Profile> {
        vec![
            Profile::new("Terrible", 1, 2000, 16_000, 8_000),
            Profile::new("Bad", 3, 800, 64_000, 32_000),
            Profile::new("OK", 5, 300, 300_000, 150_000),
            Profile::new("Good", 8, 80, 2_000_000, 1_000_000),
            Profile::new("Full", 10, 0, 0, 0),
        ]
    }
}

/// Body of `GET /status` on the control API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub level: i64,
    pub profile: Profile,
}

/// Body of `POST /level` on the control API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelRequest {
    pub level: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Http,
    Tunnel,
}

// Summary of one proxied exchange, emitted once the transfer has finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferLog {
    pub kind: TransferKind,
    pub target: String,
    pub level: i64,
    pub profile: String,
    pub bytes_down: u64,
    pub bytes_up: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl TransferLog {
    pub fn new(kind: TransferKind, target: impl Into<String>, profile: &Profile) -> Self {
        Self {
            kind,
            target: target.into(),
            level: profile.level,
            profile: profile.name.clone(),
            bytes_down: 0,
            bytes_up: 0,
            started_at: Utc::now(),
            duration_ms: 0,
            error: None,
        }
    }

    /// Stamp the elapsed time since `started_at`.
    pub fn finish(mut self) -> Self {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
        self
    }
}
