//! Command-line host for the swkit offline agent.
//!
//! Installs and activates the agent against the live network, then fetches
//! each URL given on the command line through it and reports where every
//! response came from:
//!
//! ```text
//! swkit-host --config game.json / /app.js /api/scores
//! 200 cache https://game.test/ text/html
//! 200 cache https://game.test/app.js
//! 200 network https://game.test/api/scores
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use swkit_common::{init_logging, LogConfig, LogFormat};
use swkit_net::{FetcherConfig, HttpFetcher, Request, Response};
use swkit_sw::{AgentConfig, Clients, NoopSync, NotificationTray, Platform, ServiceWorkerContainer};
use tracing::{error, info};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "swkit-host")]
#[command(about = "Install the offline agent and fetch URLs through it")]
struct Args {
    /// Agent configuration (JSON). Built-in defaults when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print a JSON report instead of one line per URL
    #[arg(long)]
    json: bool,

    /// Replay the configured background sync tag after fetching
    #[arg(long)]
    sync: bool,

    /// URLs to fetch, absolute or relative to the scope
    urls: Vec<String>,
}

#[derive(Serialize, Debug)]
struct FetchReport {
    url: String,
    status: Option<u16>,
    source: &'static str,
    content_type: Option<String>,
    error: Option<String>,
}

impl FetchReport {
    fn failed(url: String, error: String) -> Self {
        Self {
            url,
            status: None,
            source: "none",
            content_type: None,
            error: Some(error),
        }
    }

    fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.to_string(),
            status: Some(response.status.as_u16()),
            source: if response.from_cache { "cache" } else { "network" },
            content_type: response.content_type().map(|m| m.essence_str().to_string()),
            error: None,
        }
    }
}

#[derive(Serialize, Debug)]
struct RunReport {
    status: &'static str,
    cache: String,
    fetches: Vec<FetchReport>,
    pending_syncs: Vec<String>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    if args.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    if let Err(e) = init_logging(log_config) {
        eprintln!("swkit-host: {}", e);
        return ExitCode::FAILURE;
    }

    let report = match run(&args).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Host run failed");
            RunReport {
                status: "error",
                cache: String::new(),
                fetches: Vec::new(),
                pending_syncs: Vec::new(),
                error: Some(format!("{:#}", e)),
            }
        }
    };

    print_report(&report, args.json);

    if report.status == "ok" {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run(args: &Args) -> Result<RunReport> {
    let config = match args.config {
        Some(ref path) => AgentConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => AgentConfig::default(),
    };

    let fetcher = HttpFetcher::new(FetcherConfig::default()).context("building HTTP client")?;
    let platform = Platform {
        fetcher: Arc::new(fetcher),
        notifier: Arc::new(NotificationTray::new()),
        clients: Arc::new(Clients::new()),
        sync: Arc::new(NoopSync),
    };

    let (container, _events) = ServiceWorkerContainer::new(config, platform)?;
    let scope = container.agent().config().scope.clone();
    let cache = container.agent().config().cache_name.clone();

    container.install().await.context("installing agent")?;
    info!(cache = %cache, "Agent active");

    let mut fetches = Vec::with_capacity(args.urls.len());
    for raw in &args.urls {
        fetches.push(fetch_one(&container, &scope, raw).await);
    }

    let drained = container.drain().await;

    let mut pending_syncs = Vec::new();
    if args.sync {
        container
            .register_sync(&container.agent().config().sync_tag)
            .await;
        pending_syncs = container.replay_sync().await;
    }

    let failed = fetches.iter().any(|f| f.error.is_some()) || !pending_syncs.is_empty();
    Ok(RunReport {
        status: if failed || drained.is_err() { "error" } else { "ok" },
        cache,
        fetches,
        pending_syncs,
        error: drained.err().map(|e| e.to_string()),
    })
}

async fn fetch_one(container: &ServiceWorkerContainer, scope: &Url, raw: &str) -> FetchReport {
    let url = match scope.join(raw) {
        Ok(url) => url,
        Err(e) => return FetchReport::failed(raw.to_string(), format!("invalid URL: {}", e)),
    };

    match container.fetch(Request::get(url.clone())).await {
        Ok(response) => FetchReport::from_response(&response),
        Err(e) => FetchReport::failed(url.to_string(), e.to_string()),
    }
}

fn print_report(report: &RunReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{}", out),
            Err(e) => eprintln!("swkit-host: could not encode report: {}", e),
        }
        return;
    }

    for fetch in &report.fetches {
        match (fetch.status, &fetch.error) {
            (Some(status), _) => match fetch.content_type {
                Some(ref mime) => println!("{} {} {} {}", status, fetch.source, fetch.url, mime),
                None => println!("{} {} {}", status, fetch.source, fetch.url),
            },
            (None, Some(e)) => println!("ERR {} {}: {}", fetch.source, fetch.url, e),
            (None, None) => println!("ERR {} {}", fetch.source, fetch.url),
        }
    }
    for tag in &report.pending_syncs {
        println!("pending sync {}", tag);
    }
    if let Some(ref e) = report.error {
        eprintln!("swkit-host: {}", e);
    }
}
