use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ratewarden::config::{LoggingConfig, RatewardenConfig};
use ratewarden::guard::{GuardBuilder, KeyedArgs};
use ratewarden::storage::Storage;
use ratewarden::{Limiter, RateKey, RatewardenError};

/// Arguments of the demo `connect` function; the user is the rate key.
struct ConnectArgs {
    key: String,
    host: String,
    port: u16,
}

impl KeyedArgs for ConnectArgs {
    fn key(&self) -> RateKey {
        RateKey::from(&self.key)
    }
}

#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about = "Fixed-window rate limiting demo")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured requests per window
    #[arg(long)]
    max_requests: Option<u64>,

    /// Override the configured window length in seconds
    #[arg(long)]
    time_window: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check a key repeatedly and report each decision
    Check {
        #[arg(short, long, default_value = "client-key")]
        key: String,
        #[arg(short = 'n', long, default_value_t = 12)]
        requests: u64,
        /// Fire all checks concurrently
        #[arg(long)]
        burst: bool,
    },
    /// Call a guarded function sharing one budget
    Guarded {
        #[arg(short = 'n', long, default_value_t = 12)]
        calls: u64,
    },
    /// Call a guarded function keyed by user
    Keyed {
        #[arg(short = 'n', long, default_value_t = 12)]
        calls: u64,
    },
    /// List tracked keys
    Keys,
    /// Forget a key
    Reset {
        #[arg(short, long)]
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RatewardenConfig::from_file(path)?,
        None => RatewardenConfig::default(),
    };
    if let Some(max_requests) = cli.max_requests {
        config.limits.max_requests = max_requests;
    }
    if let Some(time_window) = cli.time_window {
        config.limits.time_window_secs = time_window;
    }

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &cli.config {
        Some(path) => info!(path = %path.display(), "Loaded configuration"),
        None => info!("Using default configuration"),
    }

    let storage = config.storage.open().await?;
    let limit = config.limits.limit_config()?;
    info!(
        storage = ?config.storage,
        max_requests = limit.max_requests,
        time_window = ?limit.time_window,
        "Configuration loaded"
    );

    match cli.command {
        Command::Check {
            key,
            requests,
            burst,
        } => {
            let limiter = config.build_limiter(storage)?;
            let key = RateKey::from(key);

            let decisions = if burst {
                futures::future::join_all((0..requests).map(|_| limiter.check_limit(&key)))
                    .await
                    .into_iter()
                    .collect::<ratewarden::Result<Vec<_>>>()?
            } else {
                let mut decisions = Vec::new();
                for _ in 0..requests {
                    decisions.push(limiter.check_limit(&key).await?);
                }
                decisions
            };

            for (i, allowed) in decisions.into_iter().enumerate() {
                if allowed {
                    println!("Request {}: Allowed", i + 1);
                } else {
                    println!("Request {}: Exceeded rate limit", i + 1);
                }
            }
        }
        Command::Guarded { calls } => {
            let add = GuardBuilder::<(u64, u64)>::new(storage, limit.max_requests, limit.time_window)
                .name("add")
                .wrap_sync(|(a, b)| a + b)?;

            for i in 0..calls {
                match add.call((i, i + 1)).await {
                    Ok(result) => println!("Result {}: {}", i + 1, result),
                    Err(e) if e.is_rate_limited() => {
                        println!("Rate limit exceeded: {e}");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Command::Keyed { calls } => {
            let connect = GuardBuilder::<ConnectArgs>::new(
                storage,
                limit.max_requests,
                limit.time_window,
            )
            .name("connect")
            .keyed()
            .wrap_sync(|args: ConnectArgs| {
                format!("{} connected to {}:{}", args.key, args.host, args.port)
            })?;

            let users = ["Alice", "Bob", "Charlie", "David", "Eve"];
            for _ in 0..calls {
                let user = users
                    .choose(&mut rand::thread_rng())
                    .copied()
                    .unwrap_or("Alice");
                let args = ConnectArgs {
                    key: user.to_string(),
                    host: "localhost".to_string(),
                    port: 3306,
                };
                match connect.call(args).await {
                    Ok(result) => println!("Result: {result}"),
                    Err(RatewardenError::RateLimitExceeded { key, .. }) => {
                        println!("Rate limit exceeded for {key}");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Command::Keys => {
            let mut keys = storage.keys().await?;
            keys.sort();
            for key in keys {
                match storage.get(&key).await? {
                    Some(state) => println!(
                        "{key}: {} request(s) since {:.3}",
                        state.num_requests, state.start_time
                    ),
                    None => warn!(key = %key, "Key vanished while listing"),
                }
            }
        }
        Command::Reset { key } => {
            let limiter = config.build_limiter(storage)?;
            limiter.reset(&RateKey::from(key)).await?;
            println!("Reset");
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

