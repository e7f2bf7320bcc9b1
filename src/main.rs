//! Taper command-line entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taper::cli::{format_profiles, ServerArgs};
use taper::runtime::run_with_runtime;
use taper::{init_logger_with_config, log_info, ControlApi, ProfileStore, ProxyServer, TaperConfig};

#[derive(Parser)]
#[command(name = "taper")]
#[command(about = "A forward proxy that shapes traffic to emulate slow networks")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the YAML configuration file
    #[arg(long, global = true, default_value = "config.yml")]
    config: PathBuf,

    #[command(flatten)]
    server: ServerArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the configured profiles and exit
    #[command(name = "profiles")]
    Profiles,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = TaperConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    cli.server.apply(&mut config)?;

    if let Some(Commands::Profiles) = cli.command {
        print!("{}", format_profiles(&config.profiles, config.initial_level));
        return Ok(());
    }

    // Held for the life of the process so buffered file output is flushed
    let _log_guard = init_logger_with_config(&config.log_level, &config.logging)?;

    let runtime_config = config.runtime.clone();
    run_with_runtime(&runtime_config, async_main(config))
}

async fn async_main(config: TaperConfig) -> Result<()> {
    log_info!("🚀 Starting taper v{}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(
        ProfileStore::new(config.profiles.clone(), config.initial_level)
            .context("Failed to build profile store")?,
    );
    let profile = store.current_profile();
    info!("📶 Initial profile: {} (level {})", profile.name, profile.level);

    let shutdown = CancellationToken::new();

    let proxy = ProxyServer::with_config(config.proxy_listen_addr, Arc::clone(&store), &config.http_client);
    let proxy_token = shutdown.clone();
    let (proxy_addr, proxy_serving) = proxy
        .bind(async move { proxy_token.cancelled().await })
        .context("Failed to bind proxy listener")?;

    let api = ControlApi::new(config.api_listen_addr, Arc::clone(&store));
    let api_token = shutdown.clone();
    let (api_addr, api_serving) = api
        .bind(async move { api_token.cancelled().await })
        .context("Failed to bind control API listener")?;

    log_info!("Test with: curl -x http://{} http://example.com/", proxy_addr);
    log_info!("Switch profile with: curl -X POST -d '{{\"level\":3}}' http://{}/level", api_addr);

    let proxy_task = tokio::spawn(proxy_serving);
    let api_task = tokio::spawn(api_serving);

    wait_for_signal().await;
    info!("🛑 Shutdown requested, closing listeners");
    shutdown.cancel();

    let (proxy_result, api_result) = tokio::join!(proxy_task, api_task);
    proxy_result.context("Proxy task panicked")??;
    api_result.context("Control API task panicked")??;

    log_info!("👋 taper stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
