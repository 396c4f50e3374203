// Copyright (c) 2026 Claimtree Labs. MIT License.
// See LICENSE for details.

//! # Claimtree Server
//!
//! Entry point for the `claimtree-server` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the core's adapters to the
//! embedded store, and serves the HTTP API.
//!
//! Subcommands:
//!
//! - `run`     — start the service
//! - `repair`  — force a stuck tree row to FAILED (offline operator tool)
//! - `status`  — probe a running instance's catalog endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use claimtree_core::config::ServiceConfig;
use claimtree_core::lifecycle::TreeLifecycle;
use claimtree_core::query::TreeReader;
use claimtree_core::store::{KvBackend, KvTable, LocalStore, ObjectBackend, ObjectStore};
use claimtree_core::types::{ProofRecord, RootRecord};

use cli::{ClaimtreeCli, Commands};
use logging::LogFormat;
use metrics::ServiceMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ClaimtreeCli::parse();

    match cli.command {
        Commands::Run(args) => run_service(args).await,
        Commands::Repair(args) => repair(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Builds the adapter stack over an opened store.
fn build_stack(
    store: Arc<LocalStore>,
    config: &ServiceConfig,
) -> Result<(TreeLifecycle, TreeReader)> {
    let objects = ObjectStore::new(
        Arc::clone(&store) as Arc<dyn ObjectBackend>,
        config.bucket.clone(),
    )
    .context("invalid bucket name in configuration")?;
    let roots: KvTable<RootRecord> = KvTable::new(
        Arc::clone(&store) as Arc<dyn KvBackend>,
        config.roots_table.clone(),
    );
    let proofs: KvTable<ProofRecord> = KvTable::new(
        Arc::clone(&store) as Arc<dyn KvBackend>,
        config.proofs_table.clone(),
    );
    Ok((
        TreeLifecycle::new(objects, roots.clone(), proofs.clone()),
        TreeReader::new(roots, proofs),
    ))
}

/// Starts the HTTP service and the metrics endpoint.
async fn run_service(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        &format!(
            "claimtree_server={level},claimtree_core={level},tower_http=warn",
            level = args.log_level
        ),
        LogFormat::from_str_lossy(&args.log_format),
    );

    // --- Configuration: refuse to start on missing required variables ---
    let config = if args.dev {
        tracing::warn!("running in dev mode: temporary storage, open authorization");
        ServiceConfig::dev_defaults()
    } else {
        ServiceConfig::from_env().context("refusing to start: incomplete configuration")?
    };
    let config = Arc::new(config);

    // --- Storage ---
    let store = if args.dev {
        LocalStore::open_temporary()
    } else {
        std::fs::create_dir_all(&args.data_dir).with_context(|| {
            format!("failed to create data directory {}", args.data_dir.display())
        })?;
        LocalStore::open(args.data_dir.join("store"))
    }
    .map_err(|e| anyhow::anyhow!("failed to open store: {e}"))?;
    let store = Arc::new(store);
    tracing::info!(data_dir = %args.data_dir.display(), dev = args.dev, "store opened");

    let (lifecycle, reader) = build_stack(Arc::clone(&store), &config)?;
    let service_metrics = Arc::new(ServiceMetrics::new());

    let state = api::AppState {
        lifecycle: Arc::new(lifecycle),
        reader: Arc::new(reader),
        config: Arc::clone(&config),
        metrics: Arc::clone(&service_metrics),
    };

    // --- HTTP API ---
    let router = api::create_router(state);
    let api_listener = tokio::net::TcpListener::bind(&args.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", args.http_addr))?;
    tracing::info!("API listening on {}", args.http_addr);

    // --- Metrics endpoint ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&service_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(&args.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", args.metrics_addr))?;
    tracing::info!("metrics listening on {}", args.metrics_addr);

    // --- Serve until shutdown ---
    tokio::select! {
        res = axum::serve(api_listener, router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    store
        .flush()
        .map_err(|e| anyhow::anyhow!("final store flush failed: {e}"))?;
    tracing::info!("claimtree-server stopped");
    Ok(())
}

/// Offline repair: conditionally flip a stuck CREATING/DELETING row to
/// FAILED. The embedded store is single-process, so this runs against a
/// stopped instance's data directory.
async fn repair(args: cli::RepairArgs) -> Result<()> {
    logging::init_logging("claimtree_server=info,claimtree_core=info", LogFormat::Pretty);

    let config =
        ServiceConfig::from_env().context("repair requires the service configuration")?;
    let store = Arc::new(
        LocalStore::open(args.data_dir.join("store"))
            .map_err(|e| anyhow::anyhow!("failed to open store: {e}"))?,
    );
    let (lifecycle, _) = build_stack(store, &config)?;

    let was = lifecycle
        .force_failed(&args.whitelist_name)
        .await
        .map_err(|e| anyhow::anyhow!("repair failed: {e}"))?;

    println!(
        "Root row for {} moved {} -> FAILED; run DeleteTree to clean up.",
        args.whitelist_name, was
    );
    Ok(())
}

/// Probes a running instance by fetching one catalog page.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!(
        "{}/MerkleTrees?pageSize=1",
        args.url.trim_end_matches('/')
    );
    let body = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Minimal HTTP GET over a raw TCP stream — just enough for the status
/// probe without pulling in an HTTP client.
async fn http_get(url: &str) -> Result<String> {
    let parsed = url::parse(url)?;

    let addr = format!("{}:{}", parsed.host, parsed.port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        parsed.path_and_query, parsed.host,
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());
    Ok(body)
}

/// Prints version information to stdout.
fn print_version() {
    println!("claimtree-server {}", env!("CARGO_PKG_VERSION"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Minimal URL parser — just enough to extract host, port, and path.
/// Avoids pulling in the `url` crate for a single call site.
mod url {
    use anyhow::{anyhow, Result};

    pub struct Parsed {
        pub host: String,
        pub port: u16,
        pub path_and_query: String,
    }

    pub fn parse(url: &str) -> Result<Parsed> {
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| anyhow!("only http:// URLs are supported: {url}"))?;
        let (authority, path) = match rest.split_once('/') {
            Some((a, p)) => (a, format!("/{p}")),
            None => (rest, "/".to_string()),
        };
        let (host, port) = match authority.split_once(':') {
            Some((h, p)) => (
                h.to_string(),
                p.parse::<u16>().map_err(|_| anyhow!("invalid port in {url}"))?,
            ),
            None => (authority.to_string(), 80),
        };
        if host.is_empty() {
            return Err(anyhow!("missing host in {url}"));
        }
        Ok(Parsed {
            host,
            port,
            path_and_query: path,
        })
    }

}
