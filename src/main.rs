//! FeatureGate controller - keeps effective cluster feature flags in sync

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kube::runtime::reflector::store::Writer;
use kube::{Api, Client, CustomResourceExt};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use featuregate::catalog::FeatureSetCatalog;
use featuregate::controller::{Controller, ControllerConfig, FeatureGateSync};
use featuregate::crd::{ensure_crd_installed, FeatureGate};
use featuregate::informer::{Informer, InformerConfig};
use featuregate::queue::BackoffConfig;
use featuregate::resolver::{resolve_spec, FeatureResolver};
use featuregate::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use featuregate::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_SECS, DEFAULT_RESYNC_PERIOD_SECS, DEFAULT_WORKERS,
    WATCH_TIMEOUT_SECS,
};

/// FeatureGate - reconciles cluster feature flags from FeatureGate resources
#[derive(Parser, Debug)]
#[command(name = "featuregate", version, about, long_about = None)]
struct Cli {
    /// Print the FeatureGate CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true, env = "FEATUREGATE_PRETTY_LOGS")]
    pretty_logs: bool,

    /// Feature set catalog (YAML); the built-in presets are used when unset
    #[arg(long, global = true, env = "FEATUREGATE_CATALOG")]
    catalog: Option<PathBuf>,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller (default mode)
    ///
    /// Watches FeatureGate resources and recomputes the effective feature
    /// mapping whenever a declaration changes.
    Controller,

    /// Resolve a FeatureGate manifest offline and print the mapping as JSON
    Resolve(ResolveArgs),
}

/// Controller settings. Global so they parse the same with or without the
/// `controller` subcommand.
#[derive(Args, Debug)]
struct ControllerArgs {
    /// Number of concurrent sync workers
    #[arg(long, global = true, env = "FEATUREGATE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Delay after a key's first failure, in milliseconds
    #[arg(
        long,
        global = true,
        env = "FEATUREGATE_BASE_DELAY_MS",
        default_value_t = DEFAULT_BASE_DELAY_MS
    )]
    base_delay_ms: u64,

    /// Upper bound on retry delay, in seconds
    #[arg(
        long,
        global = true,
        env = "FEATUREGATE_MAX_DELAY_SECS",
        default_value_t = DEFAULT_MAX_DELAY_SECS
    )]
    max_delay_secs: u64,

    /// Requeues per key before it is dropped (0 = unlimited)
    #[arg(long, global = true, env = "FEATUREGATE_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Base resync period in seconds (0 disables resync)
    #[arg(
        long,
        global = true,
        env = "FEATUREGATE_RESYNC_SECS",
        default_value_t = DEFAULT_RESYNC_PERIOD_SECS
    )]
    resync_secs: u64,

    /// Only watch FeatureGates matching this label selector
    #[arg(long, global = true, env = "FEATUREGATE_LABEL_SELECTOR")]
    label_selector: Option<String>,

    /// Don't apply the FeatureGate CRD on startup
    #[arg(long, global = true)]
    skip_crd_install: bool,
}

impl ControllerArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            max_retries: self.max_retries,
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.base_delay_ms),
                max_delay: Duration::from_secs(self.max_delay_secs),
            },
        }
    }

    fn informer_config(&self) -> InformerConfig {
        InformerConfig {
            resync_period: (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs)),
            watch_timeout_secs: WATCH_TIMEOUT_SECS,
            label_selector: self.label_selector.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// FeatureGate manifest (YAML)
    #[arg(short = 'f', long)]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // More than one rustls provider may be compiled in through kube.
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&FeatureGate::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let catalog = load_catalog(cli.catalog.as_deref())?;
    match cli.command.unwrap_or(Commands::Controller) {
        Commands::Resolve(args) => run_resolve(args, &catalog),
        Commands::Controller => run_controller(cli.controller, catalog, cli.pretty_logs).await,
    }
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<FeatureSetCatalog> {
    match path {
        Some(path) => FeatureSetCatalog::from_file(path)
            .with_context(|| format!("Failed to load feature set catalog {}", path.display())),
        None => Ok(FeatureSetCatalog::builtin()),
    }
}

fn run_resolve(args: ResolveArgs, catalog: &FeatureSetCatalog) -> anyhow::Result<()> {
    let manifest = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let declaration: FeatureGate =
        serde_yaml::from_str(&manifest).context("Failed to parse FeatureGate manifest")?;

    let features = resolve_spec(&declaration.key(), &declaration.spec, catalog)?;
    println!("{}", serde_json::to_string_pretty(&features)?);
    Ok(())
}

async fn run_controller(
    args: ControllerArgs,
    catalog: FeatureSetCatalog,
    pretty_logs: bool,
) -> anyhow::Result<()> {
    let telemetry = init_telemetry(TelemetryConfig {
        log_format: if pretty_logs {
            LogFormat::Pretty
        } else {
            LogFormat::Json
        },
        ..Default::default()
    })?;

    let catalog = Arc::new(catalog);
    tracing::info!(feature_sets = catalog.len(), "Loaded feature set catalog");

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    if !args.skip_crd_install {
        ensure_crd_installed(&client)
            .await
            .context("Failed to install FeatureGate CRD")?;
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!(error = %e, "Signal handler failed, shutting down");
        }
        signal_token.cancel();
    });

    let writer = Writer::default();
    let store = writer.as_reader();
    let resolver = Arc::new(FeatureResolver::new(catalog, Arc::new(store.clone())));
    let controller = Controller::new(
        Arc::new(FeatureGateSync::new(resolver)),
        args.controller_config(),
    );

    let informer = Informer::new(writer, controller.handlers(), args.informer_config());
    let informer_task = tokio::spawn(informer.run(Api::all(client), shutdown.clone()));

    // Workers read through the store; don't start them on a partial cache.
    tracing::info!("Waiting for FeatureGate cache to sync...");
    tokio::select! {
        _ = shutdown.cancelled() => {}
        ready = store.wait_until_ready() => {
            ready.context("FeatureGate cache writer dropped before initial sync")?;
            tracing::info!("FeatureGate cache synced, starting workers");
            controller.run(shutdown.clone()).await;
        }
    }

    shutdown.cancel();
    if let Err(e) = informer_task.await {
        tracing::warn!(error = %e, "Informer task failed");
    }
    tracing::info!("FeatureGate controller stopped");
    telemetry.shutdown();
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("Failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<_, anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        res = ctrl_c => res?,
        res = terminate => res?,
    }
    tracing::info!("Shutdown signal received");
    Ok(())
}
