/*
 * Networkmachinery - NetworkPerformanceTest Controller
 * Copyright (C) 2025 Networkmachinery
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! NetworkPerformanceTest Controller
//!
//! - Watches `NetworkPerformanceTest` resources and their worker pods
//! - Runs one netperf worker pod per test and records its results in status
//! - Serves the validating admission webhook and health probes
//! - Elects a single active replica through a coordination Lease

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use kube::CustomResourceExt;
use networkperformance_controller::leader_election::LeaderElector;
use networkperformance_controller::{
    run_task_controller, webhook, ControllerConfig, Error, NetworkPerformanceTest,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_PATH: &str = "/config/config.yaml";

#[derive(Parser)]
#[command(name = "networkperformance-test-controller")]
#[command(about = "Runs NetworkPerformanceTest resources to completion", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Controller configuration file
    #[arg(long, env = "CONTROLLER_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Enable or disable leader election (overrides the config file)
    #[arg(long, env = "LEADER_ELECT")]
    leader_elect: Option<bool>,

    /// Namespace of the leader election lease
    #[arg(long)]
    leader_election_namespace: Option<String>,

    /// Name of the leader election lease
    #[arg(long)]
    leader_election_id: Option<String>,

    /// Do not start the admission webhook server
    #[arg(long)]
    disable_webhook: bool,

    #[arg(long, env = "WEBHOOK_PORT")]
    webhook_port: Option<u16>,

    /// PEM certificate for the webhook server
    #[arg(long, env = "WEBHOOK_CERT_PATH")]
    webhook_cert: Option<String>,

    /// PEM private key for the webhook server
    #[arg(long, env = "WEBHOOK_KEY_PATH")]
    webhook_key: Option<String>,

    #[arg(long, value_enum, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller (default)
    Run,

    /// Print the NetworkPerformanceTest CRD as YAML
    Crd,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Crd) => {
            print!("{}", serde_yaml::to_string(&NetworkPerformanceTest::crd())?);
            Ok(())
        }
        Some(Command::Run) | None => {
            init_tracing(cli.log_format);
            run(cli).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(
        "Starting NetworkPerformanceTest Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = load_controller_config(&cli);
    config
        .validate()
        .map_err(|e| Error::ConfigError(e.to_string()))?;

    let client = kube::Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    // Every replica serves admission, leader or not
    let webhook_handle = if cli.disable_webhook {
        info!("Admission webhook disabled");
        None
    } else {
        let webhook_config = config.webhook.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = webhook::serve(&webhook_config, shutdown.clone()).await {
                error!("Admission webhook server failed: {}", e);
                shutdown.cancel();
            }
        }))
    };

    let leader_guard = if config.leader_election.enabled {
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &config.leader_election,
            &leader_identity(),
        ));
        match elector.acquire(shutdown.clone()).await {
            Some(guard) => Some(guard),
            None => {
                info!("Shutdown requested before leadership was acquired");
                return Ok(());
            }
        }
    } else {
        info!("Leader election disabled");
        None
    };

    run_task_controller(client, config, shutdown.clone()).await?;

    if let Some(guard) = leader_guard {
        if let Err(e) = guard.release().await {
            warn!("Failed to release leader lease: {}", e);
        }
    }

    shutdown.cancel();
    if let Some(handle) = webhook_handle {
        if let Err(e) = handle.await {
            error!("Webhook task join error: {:?}", e);
        }
    }

    info!("Controller stopped");
    Ok(())
}

/// Load the config file, falling back to defaults, then apply CLI overrides
fn load_controller_config(cli: &Cli) -> ControllerConfig {
    let mut config = if Path::new(&cli.config).exists() {
        match ControllerConfig::from_mounted_file(&cli.config) {
            Ok(cfg) => {
                info!("Loaded controller configuration from {}", cli.config);
                cfg
            }
            Err(err) => {
                warn!(
                    "Failed to load configuration from {}: {}. Using defaults.",
                    cli.config, err
                );
                ControllerConfig::default()
            }
        }
    } else {
        info!("No configuration at {}, using defaults", cli.config);
        ControllerConfig::default()
    };

    if let Some(enabled) = cli.leader_elect {
        config.leader_election.enabled = enabled;
    }
    if let Some(namespace) = &cli.leader_election_namespace {
        config.leader_election.namespace.clone_from(namespace);
    }
    if let Some(lease_name) = &cli.leader_election_id {
        config.leader_election.lease_name.clone_from(lease_name);
    }
    if let Some(port) = cli.webhook_port {
        config.webhook.port = port;
    }
    if cli.webhook_cert.is_some() {
        config.webhook.cert_path.clone_from(&cli.webhook_cert);
    }
    if cli.webhook_key.is_some() {
        config.webhook.key_path.clone_from(&cli.webhook_key);
    }

    config
}

/// Pod name when running in-cluster, a random id otherwise
fn leader_identity() -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("networkperformance-controller-{}", uuid::Uuid::new_v4()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
