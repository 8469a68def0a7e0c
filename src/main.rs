//! oVirt CSI Operator
//!
//! Keeps the oVirt CSI StorageClass in sync with the storage domain of the
//! node the operator runs on, and marks the operator not upgradeable.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ovirt_csi_operator::controlplane::platform::DEFAULT_CONFIG_PATH;
use ovirt_csi_operator::{
    ClusterPorts, ConflictRetry, DriverConfig, Error, Orchestrator, OrchestratorConfig,
    OvirtConfig, PlatformFactory, Result, StorageClassPolicy, SyncMetrics,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// oVirt CSI Operator - StorageClass and upgradeability management for oVirt
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name of the node this operator runs on
    #[arg(long, env = "NODE_NAME")]
    node: String,

    /// Path of the oVirt connection config
    #[arg(long, env = "OVIRT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    ovirt_config: String,

    /// Interval between full resyncs in seconds
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "600")]
    resync_interval_secs: u64,

    /// Deadline for a single sync in seconds
    #[arg(long, env = "SYNC_TIMEOUT", default_value = "120")]
    sync_timeout_secs: u64,

    /// Attempts for writes that hit a resourceVersion conflict
    #[arg(long, env = "CONFLICT_RETRIES", default_value = "5")]
    conflict_retries: u32,

    /// Value of allowVolumeExpansion on a newly created StorageClass
    #[arg(long, env = "ALLOW_VOLUME_EXPANSION", default_value = "true", action = clap::ArgAction::Set)]
    allow_volume_expansion: bool,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    info!("Starting oVirt CSI Operator");
    info!("  Version: {}", ovirt_csi_operator::VERSION);
    info!("  Node: {}", args.node);
    info!("  oVirt config: {}", args.ovirt_config);

    let ovirt_config = OvirtConfig::load(&args.ovirt_config)?;
    let platform = Arc::new(PlatformFactory::ovirt(ovirt_config)?);

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes API");

    let registry = prometheus::Registry::new();
    let metrics = SyncMetrics::register(&registry)?;

    let config = OrchestratorConfig {
        node_name: args.node.clone(),
        driver: DriverConfig {
            resync_interval: Duration::from_secs(args.resync_interval_secs),
            sync_timeout: Duration::from_secs(args.sync_timeout_secs),
            ..Default::default()
        },
        storage_class: StorageClassPolicy {
            allow_volume_expansion: args.allow_volume_expansion,
        },
        conflict_retry: ConflictRetry::with_attempts(args.conflict_retries),
    };

    let orchestrator = Orchestrator::new(config, ClusterPorts::kube(client.clone()), platform)
        .with_watches(client)
        .with_metrics(metrics);

    // Start health server
    let health_addr = parse_addr(&args.health_addr, "health")?;
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = parse_addr(&args.metrics_addr, "metrics")?;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    orchestrator.run(cancel).await?;

    info!("Operator shutdown complete");
    Ok(())
}

fn parse_addr(addr: &str, server: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|e| Error::Configuration(format!("Invalid {} server address: {}", server, e)))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| -> Result<tracing_subscriber::filter::Directive> {
        d.parse()
            .map_err(|e| Error::Configuration(format!("Invalid log directive {}: {}", d, e)))
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?)
        .add_directive(directive("reqwest=warn")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: SocketAddr) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::from("ok"));
            match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {}
                _ => {
                    *response.body_mut() = Body::from("not found");
                    *response.status_mut() = StatusCode::NOT_FOUND;
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, registry: prometheus::Registry) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != "/metrics" {
                        *response.body_mut() = Body::from("not found");
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        return Ok::<_, std::convert::Infallible>(response);
                    }

                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    match encoder.encode(&registry.gather(), &mut buffer) {
                        Ok(()) => {
                            *response.body_mut() = Body::from(buffer);
                            if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                                response.headers_mut().insert(CONTENT_TYPE, content_type);
                            }
                        }
                        Err(e) => {
                            *response.body_mut() = Body::from(e.to_string());
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
