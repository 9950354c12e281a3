//! Offline gateway driver.
//!
//! Runs one worker version against a live origin and reports what the
//! gateway did as JSON:
//! - `install`: precache the manifest and activate
//! - `fetch`: install, then request paths the way a controlled page would
//! - `push`: deliver a push payload, optionally clicking the notification

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use offline_common::{
    init_logging, GatewayError, LogConfig, LogFormat, OptionExt, Result, ResultExt,
};
use offline_net::http::Method;
use offline_net::{LoaderConfig, Request, ResourceLoader};
use offline_sw::{GatewayConfig, Registration, ServiceWorkerEvent, WorkerHost};
use serde_json::json;
use tracing::{debug, error};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "offline-gateway")]
#[command(about = "Drive the offline cache gateway against a live origin")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "OFFLINE_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Origin the precache manifest is resolved against
    #[arg(long, env = "OFFLINE_GATEWAY_ORIGIN")]
    origin: Option<Url>,

    /// Window opened when a notification is clicked
    #[arg(long, env = "OFFLINE_GATEWAY_CLICK_URL")]
    click_url: Option<Url>,

    /// Log format: pretty, compact or json
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Precache the manifest and activate the worker
    Install,

    /// Install, then fetch paths through the gateway
    Fetch {
        /// Paths relative to the origin
        #[arg(required = true)]
        paths: Vec<String>,

        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
    },

    /// Deliver a push payload
    Push {
        /// Push body; omitted means no data
        payload: Option<String>,

        /// Click the notification after it is shown
        #[arg(long)]
        click: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::quiet()
    };
    if let Err(e) = init_logging(log_config.with_format(args.log_format)) {
        eprintln!("{}", e);
    }

    match run(args).await {
        Ok(report) => {
            println!("{}", report);
        }
        Err(e) => {
            error!(category = e.category(), error = %e, "Gateway run failed");
            println!("{}", json!({ "status": "error", "error": e.to_string() }));
            std::process::exit(1);
        }
    }
}

fn load_config(args: &Args) -> Result<GatewayConfig> {
    let mut config = match args.config {
        Some(ref path) => {
            let text = std::fs::read_to_string(path)?;
            GatewayConfig::from_json(&text)
                .map_err(|e| GatewayError::config_with_source(path.display().to_string(), e))?
        }
        None => GatewayConfig::default(),
    };

    if let Some(ref origin) = args.origin {
        config.origin = origin.clone();
    }
    if let Some(ref click_url) = args.click_url {
        config.notification_click_url = Some(click_url.clone());
    }

    config
        .validate()
        .map_err(|e| GatewayError::config_with_source("invalid gateway configuration", e))?;
    Ok(config)
}

async fn run(args: Args) -> Result<serde_json::Value> {
    let mut config = load_config(&args)?;

    let loader = ResourceLoader::new(LoaderConfig::default()).context("building HTTP client")?;
    let (host, mut events) = WorkerHost::new(Arc::new(loader));
    let registration = Registration::new(config.origin.clone(), host);

    if matches!(args.command, Command::Push { .. }) {
        // Notifications need an active worker, not a warm cache.
        config.precache.clear();
    }

    let worker = registration
        .update(config)
        .await
        .map_err(|e| GatewayError::worker_with_source("install failed", e))?;

    while let Ok(event) = events.try_recv() {
        if let ServiceWorkerEvent::StateChange { new_state, .. } = event {
            debug!(worker = %worker.id, state = ?new_state, "Lifecycle");
        }
    }

    let report = match args.command {
        Command::Install => {
            let caches = registration.host().caches.read().await;
            let entries = caches
                .get(worker.cache_name())
                .ok_or_not_found(worker.cache_name())?
                .len();
            json!({
                "status": "ok",
                "cache": worker.cache_name(),
                "entries": entries,
                "caches": caches.keys(),
            })
        }
        Command::Fetch { paths, method } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|e| GatewayError::InvalidArgument(e.to_string()))?;

            let mut results = Vec::with_capacity(paths.len());
            for path in &paths {
                let url = worker
                    .config()
                    .resolve(path)
                    .map_err(|e| GatewayError::InvalidArgument(e.to_string()))?;
                let response = registration
                    .fetch(Request::new(method.clone(), url))
                    .await
                    .map_err(|e| GatewayError::network_with_source(path.clone(), e))?;

                results.push(json!({
                    "path": path,
                    "source": format!("{:?}", response.source).to_lowercase(),
                    "status": response.response.status.as_u16(),
                    "bytes": response.response.body.len(),
                }));
            }
            json!({ "status": "ok", "cache": worker.cache_name(), "responses": results })
        }
        Command::Push { payload, click } => {
            let data = payload.map(Bytes::from);
            let shown = registration
                .push(data)
                .await
                .map_err(|e| GatewayError::worker_with_source("push failed", e))?;

            let opened = if click {
                let client = registration
                    .notification_click(shown.id)
                    .await
                    .map_err(|e| GatewayError::worker_with_source("notification click failed", e))?;
                Some(client.url.to_string())
            } else {
                None
            };

            json!({
                "status": "ok",
                "notification": {
                    "title": shown.title,
                    "body": shown.body,
                    "icon": shown.icon,
                },
                "opened": opened,
            })
        }
    };

    Ok(report)
}
