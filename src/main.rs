use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use throttle::config::ThrottleConfig;
use throttle::ratelimit::RateLimiter;
use throttle::{with_key, Context, Throttle, ThrottleError};

/// Drive a burst of requests for one key through the throttle.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Rate limit key the requests are attributed to
    #[arg(short, long, default_value = "example")]
    key: String,

    /// Number of requests to send
    #[arg(short = 'n', long, default_value_t = 5)]
    requests: u32,

    /// Per-request deadline in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    info!("Starting throttle");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ThrottleConfig::load(args.config.as_deref())?;
    info!(
        backend = ?config.storage.backend,
        max_request = config.default_rate.max_request,
        window_secs = config.default_rate.window_secs,
        "Configuration loaded"
    );

    let store = config.storage.build_store();
    let limiter =
        RateLimiter::with_seed_timeout(config.default_rate(), store, config.seed_timeout()).await;
    let throttle = Throttle::new(limiter);
    info!("Rate limiter initialized");

    let timeout = Duration::from_millis(args.timeout_ms);
    let mut admitted = 0;
    for request in 1..=args.requests {
        let ctx = with_key(&Context::background().with_timeout(timeout), args.key.as_str());

        match throttle.handle(&ctx).await {
            Ok(()) => {
                admitted += 1;
                info!(request, key = %args.key, "Admitted");
            }
            Err(ThrottleError::LimitExceeded) => {
                info!(request, key = %args.key, "Rejected: limit exceeded");
            }
            Err(err) => {
                warn!(request, key = %args.key, error = %err, "Admission check failed");
            }
        }
    }

    info!(admitted, total = args.requests, "Done");
    Ok(())
}
