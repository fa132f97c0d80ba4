use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::ratelimit::open_store;
use ratewarden::{IdentityContext, Limiter, LimiterConfig};

/// Fixed-window rate limiter operator tool.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run direct checks against a single key
    Check {
        #[arg(long)]
        key: String,
        #[arg(long)]
        limit: u64,
        #[arg(long, default_value_t = 1)]
        ttl_secs: u64,
        /// Number of consecutive checks
        #[arg(long, default_value_t = 1)]
        hits: u32,
        #[arg(long, default_value = "Too Many Requests")]
        message: String,
    },
    /// Evaluate the configured rules for an operation
    Evaluate {
        #[arg(long)]
        operation: String,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[arg(long, default_value_t = 1)]
        hits: u32,
    },
    /// Run one expiry sweep on the configured store
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = LimiterConfig::load(cli.config.as_deref())?;
    info!(driver = ?config.driver, "Configuration loaded");

    match cli.command {
        Command::Check {
            key,
            limit,
            ttl_secs,
            hits,
            message,
        } => {
            let limiter = Limiter::from_config(&config, None).await?;
            let ttl = Duration::from_secs(ttl_secs);
            for hit in 1..=hits {
                let decision = limiter.check_key(&key, limit, ttl, &message).await?;
                print_decision(hit, &decision);
            }
        }
        Command::Evaluate {
            operation,
            ip,
            session,
            user,
            hits,
        } => {
            let limiter = Limiter::from_config(&config, None).await?;
            let ctx = IdentityContext {
                operation,
                ip,
                session_id: session,
                user_id: user,
            };
            for hit in 1..=hits {
                let decision = limiter.check(&ctx).await?;
                print_decision(hit, &decision);
            }
        }
        Command::Sweep => {
            let store = open_store(&config, None).await?;
            let removed = store.sweep().await?;
            println!("{}", json!({ "store": store.name(), "removed": removed }));
        }
    }

    Ok(())
}

fn print_decision(hit: u32, decision: &ratewarden::Decision) {
    let body = match decision.rejection() {
        None => json!({ "hit": hit, "accepted": true }),
        Some(rejection) => json!({
            "hit": hit,
            "accepted": false,
            "count": rejection.count,
            "limit": rejection.limit,
            "response": rejection.to_json(),
        }),
    };
    println!("{}", body);
}
