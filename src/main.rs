use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ipnet::IpNet;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use warden::authz::{
    Chain, DecisionEngine, GlobalLimitProvider, RateLimiter, RouteLimitProvider,
    StopOnBlacklist, StopOnOverLimit, StopOnWhitelist,
};
use warden::conf::{ConfStore, Limit};
use warden::config::WardenConfig;
use warden::grpc::GrpcServer;
use warden::metrics::{MetricReporter, NullReporter, PrometheusReporter};
use warden::store::{RedisStore, Store};

/// Warden - external authorization and rate limiting service
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<String>,

    /// Redis address (host:port)
    #[arg(short = 'r', long = "redis-address", global = true)]
    redis_address: Option<String>,

    /// Log level
    #[arg(short = 'l', long = "log-level", global = true, default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the authorization server (the default)
    Serve(ServeArgs),

    /// Manage the whitelisted CIDR set
    Whitelist {
        #[command(subcommand)]
        action: CidrAction,
    },

    /// Manage the blacklisted CIDR set
    Blacklist {
        #[command(subcommand)]
        action: CidrAction,
    },

    /// Set the global rate limit
    SetLimit {
        /// Requests allowed per window
        count: u64,

        /// Window size, e.g. "1s" or "2m"
        #[arg(value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Store the limit but leave it unenforced
        #[arg(long = "disabled")]
        disabled: bool,
    },

    /// Toggle report-only mode
    SetReportOnly {
        /// true to report without blocking
        report_only: bool,
    },

    /// Set a per-route rate limit
    SetRouteLimit {
        /// Route path, e.g. "/api/foo"
        route: String,

        /// Requests allowed per window
        count: u64,

        /// Window size, e.g. "1s" or "2m"
        #[arg(value_parser = humantime::parse_duration)]
        duration: Duration,

        /// Store the limit but leave it unenforced
        #[arg(long = "disabled")]
        disabled: bool,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    /// gRPC server address
    #[arg(short = 'a', long = "address")]
    addr: Option<String>,

    /// Default request limit per window
    #[arg(short = 'q', long = "limit")]
    limit: Option<u64>,

    /// Default window to apply the limit over, e.g. "1s" or "2m"
    #[arg(short = 'y', long = "limit-duration", value_parser = humantime::parse_duration)]
    limit_duration: Option<Duration>,

    /// Whether the default limit is enforced
    #[arg(short = 'e', long = "limit-enabled")]
    limit_enabled: Option<bool>,

    /// Report only, do not block
    #[arg(short = 'o', long = "report-only")]
    report_only: bool,

    /// Ingress class tagged on metrics
    #[arg(long = "ingress-class")]
    ingress_class: Option<String>,

    /// Configuration sync interval, e.g. "30s"
    #[arg(long = "sync-interval", value_parser = humantime::parse_duration)]
    sync_interval: Option<Duration>,

    /// Record admission metrics in the process Prometheus registry
    #[arg(long = "metrics", default_value = "false")]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_target(false)
        .init();

    // Load configuration with CLI overrides
    let mut config = match args.config.as_deref() {
        Some(path) => WardenConfig::from_file(path)?,
        None => WardenConfig::default(),
    };
    if let Some(redis_address) = args.redis_address {
        config.redis.address = redis_address;
    }

    match args.command.unwrap_or_else(|| Command::Serve(ServeArgs::default())) {
        Command::Serve(serve_args) => serve(config, serve_args).await,
        command => administer(config, command).await,
    }
}

/// Run the authorization server until a shutdown signal arrives.
async fn serve(mut config: WardenConfig, args: ServeArgs) -> anyhow::Result<()> {
    info!("Starting Warden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Override with CLI arguments
    if let Some(ref addr) = args.addr {
        if let Ok(addr) = addr.parse() {
            config.server.grpc_addr = addr;
        }
    }
    if let Some(limit) = args.limit {
        config.defaults.limit_count = limit;
    }
    if let Some(limit_duration) = args.limit_duration {
        config.defaults.limit_duration_secs = limit_duration.as_secs().max(1);
    }
    if let Some(limit_enabled) = args.limit_enabled {
        config.defaults.limit_enabled = limit_enabled;
    }
    if args.report_only {
        config.defaults.report_only = true;
    }
    if let Some(ingress_class) = args.ingress_class {
        config.ingress_class = ingress_class;
    }
    if let Some(sync_interval) = args.sync_interval {
        config.sync.interval_secs = sync_interval.as_secs().max(1);
    }

    info!(
        grpc_addr = %config.server.grpc_addr,
        redis = %config.redis.address,
        "Configuration loaded"
    );

    let reporter: Arc<dyn MetricReporter> = if args.metrics {
        Arc::new(PrometheusReporter::new(
            prometheus::default_registry(),
            &config.ingress_class,
        )?)
    } else {
        Arc::new(NullReporter)
    };

    // The store dials lazily: Warden serves its seeded defaults even while
    // Redis is unreachable, and fails open on counter errors.
    let store: Arc<dyn Store> = Arc::new(RedisStore::new(&config.redis.store_config())?);

    let default_limit = config.defaults.limit();
    let conf_store = Arc::new(ConfStore::new(
        store.clone(),
        config.defaults.parsed_whitelist(),
        config.defaults.parsed_blacklist(),
        default_limit,
        config.defaults.report_only,
    ));

    info!(
        limit_count = default_limit.count,
        limit_enabled = default_limit.enabled,
        report_only = config.defaults.report_only,
        "Seeded configuration defaults"
    );

    // Background configuration synchronizer
    let sync_interval = Duration::from_secs(config.sync.interval_secs);
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let sync_conf = conf_store.clone();
    let sync_task = tokio::spawn(async move {
        sync_conf
            .run_sync(sync_interval, async {
                let _ = stop_rx.await;
            })
            .await;
    });

    let chain = Chain::new(vec![
        Box::new(StopOnWhitelist),
        Box::new(StopOnBlacklist),
        Box::new(StopOnOverLimit::new(RateLimiter::new(
            store.clone(),
            Box::new(GlobalLimitProvider),
        ))),
        Box::new(StopOnOverLimit::new(RateLimiter::new(
            store.clone(),
            Box::new(RouteLimitProvider),
        ))),
    ]);

    let engine = Arc::new(DecisionEngine::new(chain, conf_store.clone(), reporter));

    let grpc_server = GrpcServer::new(config.server.grpc_addr, engine);

    info!("Starting gRPC server on {}", config.server.grpc_addr);
    grpc_server.serve_with_shutdown(shutdown_signal()).await?;

    let _ = stop_tx.send(());
    sync_task.await?;

    info!("Warden stopped");
    Ok(())
}

/// Apply one administrative mutation and exit.
///
/// Mutations write through to the store; running servers pick them up on
/// their next sync.
async fn administer(config: WardenConfig, command: Command) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(RedisStore::new(&config.redis.store_config())?);
    let conf = ConfStore::new(store, Vec::new(), Vec::new(), Limit::disabled(), false);

    match command {
        Command::Whitelist {
            action: CidrAction::Add { cidrs },
        } => conf.add_whitelist_cidrs(&cidrs).await?,
        Command::Whitelist {
            action: CidrAction::Remove { cidrs },
        } => conf.remove_whitelist_cidrs(&cidrs).await?,
        Command::Blacklist {
            action: CidrAction::Add { cidrs },
        } => conf.add_blacklist_cidrs(&cidrs).await?,
        Command::Blacklist {
            action: CidrAction::Remove { cidrs },
        } => conf.remove_blacklist_cidrs(&cidrs).await?,
        Command::SetLimit {
            count,
            duration,
            disabled,
        } => {
            conf.set_limit(Limit {
                count,
                duration,
                enabled: !disabled,
            })
            .await?
        }
        Command::SetReportOnly { report_only } => conf.set_report_only(report_only).await?,
        Command::SetRouteLimit {
            route,
            count,
            duration,
            disabled,
        } => {
            let mut routes = HashMap::new();
            routes.insert(
                route,
                Limit {
                    count,
                    duration,
                    enabled: !disabled,
                },
            );
            conf.set_route_rate_limits(&routes).await?
        }
        Command::Serve(_) => unreachable!("serve is dispatched separately"),
    }

    info!("configuration updated");
    Ok(())
}

#[derive(Subcommand, Debug)]
enum CidrAction {
    /// Add CIDRs to the set
    Add {
        /// CIDRs in A.B.C.D/N form
        #[arg(required = true)]
        cidrs: Vec<IpNet>,
    },

    /// Remove CIDRs from the set
    Remove {
        /// CIDRs in A.B.C.D/N form
        #[arg(required = true)]
        cidrs: Vec<IpNet>,
    },
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
