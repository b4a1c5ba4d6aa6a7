//! `catapt` - serve a signed APT archive built from git components.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use catapt_core::catalogue::Catalogue;
use catapt_core::host::{HostAdapter, SystemHost};
use catapt_core::signing::{Signer, verify_cleartext};
use catapt_server::{AppState, Collaborators, Config, create_router};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "catapt")]
#[command(version, about = "Signed APT archive for git-hosted components")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "CATAPT_CONFIG", default_value = "catapt.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the archive over HTTP
    Serve,
    /// Validate the configuration, signing key and every descriptor
    Check,
    /// Generate a new Ed25519 signing key
    Keygen,
    /// Print the armored OpenPGP public key for clients
    ExportKey,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve(Config::load(&cli.config)?).await,
        Commands::Check => check(&Config::load(&cli.config)?),
        Commands::Keygen => keygen(),
        Commands::ExportKey => {
            print!("{}", Config::load(&cli.config)?.signer()?.export_public_key());
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let listen_addr = format!("{}:{}", config.bind, config.port);
    let parts = Collaborators::discover(&config)?;
    let state = AppState::build(config, parts)?;
    let app = create_router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;
    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn check(config: &Config) -> Result<()> {
    let signer = config.signer()?;
    let sample = signer.clear_sign("catapt\n");
    verify_cleartext(&sample, &signer.verifying_key())
        .map_err(|e| anyhow::anyhow!(e.report()))
        .context("signing key failed a self-test")?;
    println!("  signing key {}", signer.fingerprint_hex());

    let host = SystemHost::new(config.host_env(SystemHost::discover()?.environment().clone()));
    let env = host.environment();
    println!("  host {} {}", env.arch, env.os_release_id);

    let catalogue =
        Catalogue::load(&config.catalogue_dir).map_err(|e| anyhow::anyhow!(e.report()))?;
    let mut failures = 0;
    for component in catalogue.components() {
        let descriptor = component.descriptor();
        let verdict = descriptor
            .supports(env)
            .and_then(|supported| descriptor.metadata_for(env).map(|_| supported));
        match verdict {
            Ok(true) => println!("  ok {}", component.name()),
            Ok(false) => println!("  skip {} (not built for this host)", component.name()),
            Err(e) => {
                failures += 1;
                println!("  error {}: {e}", component.name());
            }
        }
    }
    anyhow::ensure!(failures == 0, "{failures} descriptor(s) failed validation");
    println!("  {} components", catalogue.len());
    Ok(())
}

fn keygen() -> Result<()> {
    let seed = Signer::generate_seed();
    let created = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX);
    let signer =
        Signer::from_base64(&seed, created, "catapt").map_err(|e| anyhow::anyhow!(e.report()))?;
    println!("  fingerprint {}", signer.fingerprint_hex());
    println!();
    println!("[signing]");
    println!("key = \"{seed}\"");
    println!("created = {created}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
