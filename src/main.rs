use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use windowgate::ratelimit::{CheckOutcome, Decision, Guard, DEFAULT_BUCKET};
use windowgate::{GateConfig, LimitSpec, MemoryStore, Options, RateLimiter, RequestContext};

/// Drive a stream of rate limit checks against an in-memory store.
///
/// Defaults come from `WINDOWGATE_*` environment variables; flags override them.
#[derive(Parser, Debug)]
#[command(name = "windowgate", version, about)]
struct Args {
    /// Bucket to check
    #[arg(long, default_value = DEFAULT_BUCKET)]
    bucket: String,

    /// Limits as requests,seconds pairs, e.g. "2,10,100,3600"
    #[arg(long)]
    limits: Option<LimitSpec>,

    /// Client address requests are identified by
    #[arg(long, default_value = "127.0.0.1")]
    client: IpAddr,

    /// Number of rounds to send
    #[arg(short = 'n', long, default_value_t = 5)]
    rounds: u32,

    /// Requests sent at once in each round
    #[arg(short, long, default_value_t = 1)]
    concurrency: usize,

    /// Pause between rounds in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Print each outcome as a JSON line
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GateConfig::from_env()?;
    info!(
        namespace = %config.namespace,
        environment = %config.environment,
        active = config.is_active(),
        retention_secs = config.retention_secs,
        "Configuration loaded"
    );
    if !config.is_active() {
        warn!("Rate limiting is inactive in this environment; every request will be admitted");
    }

    let limiter = RateLimiter::new(config, Arc::new(MemoryStore::new()))?;
    let guard = limiter.guard(&args.bucket, args.limits.clone(), Options::new())?;
    info!(bucket = %guard.bucket(), limits = %guard.limits(), "Checking");

    tokio::select! {
        result = run(&limiter, &guard, &args) => result?,
        _ = shutdown_signal() => {}
    }

    info!("Done");
    Ok(())
}

async fn run(limiter: &RateLimiter, guard: &Guard, args: &Args) -> anyhow::Result<()> {
    let ctx = RequestContext::new().with_remote_addr(args.client);
    let mut sent = 0u64;

    for round in 0..args.rounds {
        if round > 0 && args.interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }

        let checks = (0..args.concurrency.max(1)).map(|_| limiter.check(&ctx, guard));
        for outcome in futures::future::join_all(checks).await {
            sent += 1;
            report(sent, &outcome?, args.json)?;
        }
    }
    Ok(())
}

fn report(n: u64, outcome: &CheckOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(outcome)?);
        return Ok(());
    }

    match &outcome.decision {
        Decision::Admitted => println!("#{} admitted", n),
        Decision::Exceeded(exceeded) => {
            let (name, value) = exceeded.retry_after_header();
            println!("#{} {} {}", n, exceeded.status_code(), exceeded);
            println!("    {}: {}", name, value);
        }
    }
    for (name, value) in &outcome.headers {
        println!("    {}: {}", name, value);
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
