mod collectors;
mod config;
mod http;
mod metrics;

use axum::serve;
use clap::Parser;
use collectors::classify::CategoryTable;
use collectors::disk;
use collectors::services::Systemctl;
use config::Config;
use http::AppContext;
use metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "homelabd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Overrides `listen` from the config file.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };
    if let Some(listen) = cli.listen {
        cfg.listen = listen;
        if let Err(err) = cfg.validate() {
            error!(error = %err, "invalid --listen override");
            std::process::exit(1);
        }
    }

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let categories = match &cfg.services.categories {
        Some(rules) => CategoryTable::from_config(rules),
        None => CategoryTable::builtin(),
    };
    info!(
        listen = %addr,
        systemctl = %cfg.services.systemctl_path,
        categories = categories.names().count(),
        request_timeout_secs = cfg.request_timeout_secs,
        "starting homelabd"
    );

    let ctx = AppContext {
        services: Arc::new(Systemctl::new(
            cfg.services.systemctl_path.clone(),
            Duration::from_millis(cfg.services.command_timeout_ms),
        )),
        mounts: disk::default_probe(),
        categories: Arc::new(categories),
        config: Arc::new(cfg),
        metrics,
    };

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "failed to start HTTP server");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let http_task = tokio::spawn(async move {
        let app = http::build_router(ctx);
        let server = serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });

        if let Err(err) = server.await {
            error!(error = %err, "HTTP server error");
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
