//! Server command-line arguments

use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use tracing::debug;

use crate::config::TaperConfig;
use crate::models::Profile;

#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    /// Forward proxy listening address
    #[arg(long)]
    pub proxy_addr: Option<String>,

    /// Control API listening address
    #[arg(long)]
    pub api_addr: Option<String>,

    /// Profile level selected at startup
    #[arg(long)]
    pub level: Option<i64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Layer the command line on top of file and environment settings
    pub fn apply(&self, config: &mut TaperConfig) -> Result<()> {
        debug!("Applying CLI overrides to configuration");

        if let Some(addr) = &self.proxy_addr {
            config.proxy_listen_addr = parse_addr(addr, "proxy")?;
        }
        if let Some(addr) = &self.api_addr {
            config.api_listen_addr = parse_addr(addr, "control API")?;
        }
        if let Some(level) = self.level {
            config.initial_level = level;
        }
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }

        config.validate().context("Invalid configuration after CLI overrides")?;
        Ok(())
    }
}

fn parse_addr(addr: &str, what: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {} address '{}': {}", what, addr, e))
}

/// Render the profile table for the `profiles` subcommand
pub fn format_profiles(profiles: &[Profile], current_level: i64) -> String {
    let mut out = format!(
        "{:<3} {:>5}  {:<10} {:>8} {:>12} {:>12}\n",
        "", "LEVEL", "NAME", "LATENCY", "DOWN B/s", "UP B/s"
    );
    for profile in profiles {
        out.push_str(&format!(
            "{:<3} {:>5}  {:<10} {:>6}ms {:>12} {:>12}\n",
            if profile.level == current_level { "*" } else { "" },
            profile.level,
            profile.name,
            profile.latency_ms,
            format_rate(profile.download_bytes_per_sec),
            format_rate(profile.upload_bytes_per_sec),
        ));
    }
    out
}

fn format_rate(bytes_per_sec: u64) -> String {
    if bytes_per_sec == 0 {
        "unlimited".to_string()
    } else {
        bytes_per_sec.to_string()
    }
}
