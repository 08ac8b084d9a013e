//! Smoke harness for the Folio offline worker.
//!
//! Registers a worker against a live origin, routes a list of paths through
//! it and prints where each response came from.
//!
//! ## Usage
//!
//! ```bash
//! # Precache the site and route two pages
//! folio-smoke route --config worker.json /about.html /styles.min.css
//!
//! # Keep the caches between runs, then check the offline fallback
//! folio-smoke route --snapshot caches.json /index.html
//! folio-smoke route --snapshot caches.json --offline /contact.html
//!
//! # Print the effective config
//! folio-smoke config --config worker.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use folio_common::{init_logging, FolioError, LogConfig, LogFormat, OptionExt, ResultExt};
use async_trait::async_trait;
use folio_net::{
    Destination, Fetcher, HttpFetcher, LoaderConfig, NetError, Request, Response,
};
use folio_sw::{
    CacheStorage, FetchDisposition, ServiceWorkerContainer, TracingNotifier, WorkerConfig,
};
use serde::Serialize;
use tracing::{error, info};
use url::Url;

#[derive(Parser)]
#[command(name = "folio-smoke")]
#[command(about = "Smoke harness for the Folio offline worker")]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, default_value = "compact", global = true)]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a worker and route paths through it
    Route {
        /// Worker config (JSON); defaults apply when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Cache snapshot to restore before and save after the run
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
        /// Storage quota in bytes
        #[arg(long)]
        quota: Option<u64>,
        /// Route with the network unavailable
        #[arg(long)]
        offline: bool,
        /// Root-relative paths to request
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Validate a config and print it with defaults filled in
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct RouteSummary {
    cache_version: String,
    precached: usize,
    precache_error: Option<String>,
    routes: Vec<RouteResult>,
}

#[derive(Debug, Serialize)]
struct RouteResult {
    path: String,
    outcome: String,
    status: Option<u16>,
    bytes: Option<usize>,
    error: Option<String>,
}

/// Network that is never reachable, for `--offline` runs.
struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        Err(NetError::Offline(request.url.to_string()))
    }
}

#[tokio::main]
async fn main() -> folio_common::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format));

    if let Err(e) = run(cli.command).await {
        error!(category = e.category(), error = %e, "Smoke run failed");
        return Err(e);
    }
    Ok(())
}

async fn run(command: Commands) -> folio_common::Result<()> {
    match command {
        Commands::Route {
            config,
            snapshot,
            quota,
            offline,
            paths,
        } => {
            let config = load_config(config.as_deref())?;
            let summary = route(config, snapshot.as_deref(), quota, offline, &paths).await?;
            let json = serde_json::to_string_pretty(&summary)
                .map_err(|e| FolioError::worker_with_source("summary encoding failed", e))?;
            println!("{json}");
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| FolioError::config_with_source("config encoding failed", e))?;
            println!("{json}");
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> folio_common::Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::load(path)
            .map_err(|e| FolioError::config_with_source(path.display().to_string(), e)),
        None => {
            let config = WorkerConfig::default();
            config
                .validate()
                .map_err(|e| FolioError::config_with_source("default config", e))?;
            Ok(config)
        }
    }
}

async fn route(
    config: WorkerConfig,
    snapshot: Option<&Path>,
    quota: Option<u64>,
    offline: bool,
    paths: &[String],
) -> folio_common::Result<RouteSummary> {
    let storage = match snapshot {
        Some(path) => CacheStorage::load(path, quota)
            .map_err(|e| FolioError::cache_with_source("restoring cache snapshot", e))?,
        None => match quota {
            Some(quota) => CacheStorage::with_quota(quota),
            None => CacheStorage::new(),
        },
    }
    .shared();

    let fetcher: Arc<dyn Fetcher> = if offline {
        Arc::new(OfflineFetcher)
    } else {
        let http = HttpFetcher::new(config.origin.clone(), LoaderConfig::default())
            .map_err(|e| FolioError::network_with_source("building HTTP client", e))?;
        Arc::new(http)
    };

    let (container, _events) = ServiceWorkerContainer::new(
        config.origin.clone(),
        Arc::clone(&storage),
        fetcher,
        Arc::new(TracingNotifier),
    );

    let cache_version = config.cache_version.clone();
    let install = container
        .register(config.clone())
        .await
        .context("registering worker")?;
    container
        .active()
        .await
        .ok_or_not_found(format!("active worker for {cache_version}"))?;

    let mut routes = Vec::with_capacity(paths.len());
    for path in paths {
        routes.push(route_one(&container, &config, path).await);
    }

    if let Some(path) = snapshot {
        storage
            .read()
            .await
            .save(path)
            .map_err(|e| FolioError::cache_with_source("saving cache snapshot", e))?;
    }

    info!(cache = %cache_version, routed = routes.len(), "Smoke run finished");
    Ok(RouteSummary {
        cache_version,
        precached: install.cached,
        precache_error: install.swallowed_error,
        routes,
    })
}

async fn route_one(
    container: &ServiceWorkerContainer,
    config: &WorkerConfig,
    path: &str,
) -> RouteResult {
    let url = match config.resolve(path) {
        Ok(url) => url,
        Err(e) => return RouteResult::failed(path, e.to_string()),
    };

    match container.fetch(request_for(url)).await {
        Ok(FetchDisposition::PassThrough) => RouteResult {
            path: path.to_string(),
            outcome: "pass-through".to_string(),
            status: None,
            bytes: None,
            error: None,
        },
        Ok(FetchDisposition::Respond(delivered)) => RouteResult {
            path: path.to_string(),
            outcome: format!("{:?}", delivered.source).to_lowercase(),
            status: Some(delivered.response.status.as_u16()),
            bytes: Some(delivered.response.body.len()),
            error: None,
        },
        Err(e) => RouteResult::failed(path, e.to_string()),
    }
}

/// Pages are requested as navigations, anything with a file extension other
/// than `.html` as a subresource.
fn request_for(url: Url) -> Request {
    let extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        None | Some("html") | Some("htm") => Request::navigate(url),
        Some("css") => Request::get(url).destination(Destination::Style),
        Some("js") => Request::get(url).destination(Destination::Script),
        Some("json") | Some("webmanifest") => Request::get(url).destination(Destination::Manifest),
        Some("woff") | Some("woff2") | Some("ttf") => {
            Request::get(url).destination(Destination::Font)
        }
        Some("png") | Some("jpg") | Some("jpeg") | Some("svg") | Some("ico") | Some("webp") => {
            Request::get(url).destination(Destination::Image)
        }
        Some(_) => Request::get(url),
    }
}

impl RouteResult {
    fn failed(path: &str, error: String) -> Self {
        Self {
            path: path.to_string(),
            outcome: "error".to_string(),
            status: None,
            bytes: None,
            error: Some(error),
        }
    }
}
