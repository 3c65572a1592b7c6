mod config;
mod engine;
mod glances;
mod heartbeat;
mod http;
mod metrics;
mod scheduler;
mod state;
mod thresholds;

use axum::serve;
use clap::Parser;
use config::Config;
use glances::GlancesClient;
use heartbeat::{HeartbeatDispatcher, KumaPushEncoder};
use metrics::Metrics;
use reqwest::Client;
use scheduler::Scheduler;
use state::{now_unix, RuntimeState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thresholds::{ThresholdConfig, ThresholdStore};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "glancewatch")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        glances = %cfg.glances.base_url,
        heartbeat_enabled = cfg.heartbeat.enabled,
        "starting glancewatch"
    );

    let seed = match cfg.thresholds.clone() {
        Some(rules) => ThresholdConfig { rules },
        None => ThresholdConfig::builtin_defaults(),
    };
    let store = match ThresholdStore::open(&cfg.thresholds_path, seed) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, path = %cfg.thresholds_path, "failed to open threshold store");
            std::process::exit(1);
        }
    };

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    let shared_state = Arc::new(RwLock::new(RuntimeState::new(now_unix())));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let app = http::build_router(metrics.clone(), shared_state.clone(), store.clone());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let scheduler_task = {
        let client = Client::builder()
            .user_agent(concat!("glancewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        let dispatcher = if cfg.heartbeat.enabled {
            let raw = cfg.heartbeat.push_url.clone().unwrap_or_default();
            match reqwest::Url::parse(&raw) {
                Ok(push_url) => Some(HeartbeatDispatcher::new(
                    client.clone(),
                    Box::new(KumaPushEncoder::new(push_url)),
                    Duration::from_millis(cfg.heartbeat.timeout_ms),
                    cfg.heartbeat.max_retries,
                    Duration::from_millis(cfg.heartbeat.retry_base_delay_ms),
                )),
                Err(err) => {
                    error!(error = %err, "invalid heartbeat push_url");
                    std::process::exit(1);
                }
            }
        } else {
            None
        };

        let scheduler = Scheduler {
            interval: Duration::from_secs(cfg.interval_secs),
            glances: GlancesClient::new(
                client,
                cfg.glances.base_url.clone(),
                cfg.glances.api_version,
                Duration::from_millis(cfg.glances.timeout_ms),
            ),
            dispatcher,
            store: store.clone(),
            state: shared_state.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(scheduler.run(shutdown_rx.clone()))
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = scheduler_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
