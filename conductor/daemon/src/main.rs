//! Thera Daemon
//!
//! Standalone WebSocket server for thera conversational sessions.
//!
//! # Usage
//!
//! ```bash
//! # Cloud backend (default)
//! GEMINI_API_KEY=... thera-daemon
//!
//! # Local backend on a custom address
//! thera-daemon --provider local --bind 0.0.0.0:8787
//!
//! # Check that the configured local model is installed, then exit
//! thera-daemon --provider local --check-models
//!
//! # With verbose logging
//! RUST_LOG=debug thera-daemon
//! ```
//!
//! # Environment Variables
//!
//! - `THERA_CONFIG`: Config file path (default: `$XDG_CONFIG_HOME/thera/config.toml`)
//! - `THERA_PROVIDER`: `cloud`/`gemini` or `local`/`ollama`
//! - `GEMINI_API_KEY`, `GEMINI_MODEL`, `GEMINI_BASE_URL`: Cloud backend
//! - `OLLAMA_BASE_URL`, `OLLAMA_MODEL`: Local backend
//! - `THERA_BIND`, `THERA_KEEPALIVE_SECS`, `THERA_MAX_FRAME_BYTES`: Server
//! - `THERA_MEMORY_CAP`, `THERA_PERSONAS_DIR`, `THERA_REQUEST_TIMEOUT_SECS`: Sessions
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - SIGTERM/SIGINT: Graceful shutdown (open sessions are released)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use thera_conductor::{
    load_config, BuiltinPersonas, Conductor, ConductorConfig, ConfigOverrides, DirectoryPersonas,
    LlmBackend, OllamaBackend, PersonaProvider, ProviderRouter,
};

/// WebSocket server for thera conversational sessions
#[derive(Debug, Parser)]
#[command(name = "thera-daemon", version, about)]
struct Args {
    /// Config file path
    #[arg(long, env = "THERA_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config and THERA_BIND)
    #[arg(long)]
    bind: Option<String>,

    /// Provider: cloud/gemini or local/ollama (overrides config and THERA_PROVIDER)
    #[arg(long)]
    provider: Option<String>,

    /// Directory of persona TOML files
    #[arg(long)]
    personas_dir: Option<PathBuf>,

    /// Debug logging for thera crates
    #[arg(short, long)]
    verbose: bool,

    /// List local models, report whether the configured one is installed, and exit
    #[arg(long)]
    check_models: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let mut config = load_config(args.config.as_deref()).context("failed to load configuration")?;
    config
        .apply_overrides(&ConfigOverrides {
            provider: args.provider.clone(),
            bind_address: args.bind.clone(),
            personas_dir: args.personas_dir.clone(),
        })
        .context("invalid command-line option")?;

    for problem in config.validate() {
        warn!(error = %problem, "Configuration problem");
    }

    if args.check_models {
        return check_models(&config).await;
    }

    run(config).await
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("thera_daemon={level}").parse()?)
                .add_directive(format!("thera_conductor={level}").parse()?),
        )
        .with_target(true)
        .init();
    Ok(())
}

async fn run(config: ConductorConfig) -> anyhow::Result<()> {
    info!(
        provider = %config.provider,
        bind = %config.server.bind_address,
        memory_cap = config.memory_cap,
        "Starting thera daemon"
    );

    let personas: Arc<dyn PersonaProvider> = match config.personas_dir {
        Some(ref dir) => {
            let directory = DirectoryPersonas::new(dir.clone());
            info!(path = %directory.root().display(), "Loading personas from directory");
            Arc::new(directory)
        }
        None => {
            let builtin = BuiltinPersonas::new();
            info!(personas = ?builtin.ids(), "Using built-in personas");
            Arc::new(builtin)
        }
    };

    let router = ProviderRouter::new(&config);
    if router.health_check().await {
        info!(provider = %router.kind(), "Backend reachable");
    } else {
        warn!(
            provider = %router.kind(),
            "Backend health check failed; requests will report errors until it recovers"
        );
    }

    let listener = TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;

    let conductor = Arc::new(Conductor::new(router, personas, config));
    thera_conductor::transport::serve(listener, conductor, shutdown_signal()).await?;

    info!("thera daemon stopped");
    Ok(())
}

async fn check_models(config: &ConductorConfig) -> anyhow::Result<()> {
    let backend = OllamaBackend::from_settings(&config.local, config.request_timeout())
        .context("failed to create local backend")?;
    let diagnostic = backend
        .diagnose()
        .await
        .context("model diagnostic failed")?;

    println!("Local model server: {}", backend.base_url());
    if diagnostic.installed.is_empty() {
        println!("No models installed.");
    } else {
        println!("Installed models:");
        for model in &diagnostic.installed {
            match model.parameters {
                Some(ref params) => println!("  {} ({params})", model.name),
                None => println!("  {}", model.name),
            }
        }
    }

    if diagnostic.configured_present {
        println!("Configured model '{}' is installed.", diagnostic.configured_model);
        Ok(())
    } else {
        anyhow::bail!(
            "configured model '{}' is not installed; run `ollama pull {}`",
            diagnostic.configured_model,
            diagnostic.configured_model
        )
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "thera-daemon",
            "--provider",
            "local",
            "--bind",
            "0.0.0.0:9000",
            "--check-models",
        ]);
        assert_eq!(args.provider.as_deref(), Some("local"));
        assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9000"));
        assert!(args.check_models);
        assert!(!args.verbose);
    }

    #[test]
    fn test_clap_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
