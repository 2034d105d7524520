use clap::Parser;
use longpoll_watchdog::{load_config, Outcome, Watchdog, WatchdogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::Instant;

/// Simulate a long-polling session guarded by an extendable watchdog:
/// arm the watchdog, ping it on every simulated client request, and report
/// how the session ended.
#[derive(Parser, Debug)]
#[command(name = "longpoll-watchdog", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "watchdog.toml")]
    config: PathBuf,

    /// Session timeout in milliseconds (overrides config)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Number of simulated client requests
    #[arg(long, default_value_t = 0)]
    pings: u32,

    /// Delay between simulated client requests, in milliseconds
    #[arg(long, default_value_t = 100)]
    ping_every_ms: u64,

    /// End the session voluntarily after this many milliseconds
    #[arg(long)]
    cancel_after_ms: Option<u64>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (arming, cancel observation)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "longpoll_watchdog=debug"
    } else {
        "longpoll_watchdog=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Load the config file and apply CLI overrides.
fn resolve_config(cli: &Cli) -> Result<WatchdogConfig, Box<dyn std::error::Error>> {
    let mut config = load_config(&cli.config)?;
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    config.validate()?;
    Ok(config)
}

async fn run_session(cli: &Cli, config: &WatchdogConfig) -> Result<Outcome, Box<dyn std::error::Error>> {
    let watchdog = Watchdog::with_config(
        config,
        Some(Box::new(|| {
            tracing::warn!("client went quiet, releasing session");
        })),
    )?;
    let start = Instant::now();

    let client = watchdog.handle();
    let pings = cli.pings;
    let ping_every = Duration::from_millis(cli.ping_every_ms);
    tokio::spawn(async move {
        for request in 1..=pings {
            tokio::time::sleep(ping_every).await;
            if !client.is_alive() {
                break;
            }
            client.ping();
            tracing::debug!(request, "client request, deadline extended");
        }
    });

    if let Some(cancel_after_ms) = cli.cancel_after_ms {
        let session = watchdog.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(cancel_after_ms)).await;
            tracing::info!("session closed by client");
            session.cancel();
        });
    }

    let outcome = watchdog.reported().await;
    tracing::info!(
        %outcome,
        elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "session finished"
    );
    Ok(outcome)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.dry_run {
        println!("Config file: {}", cli.config.display());
        println!("timeout:       {:?}", config.timeout());
        println!("poll interval: {:?}", config.poll_interval());
        return ExitCode::SUCCESS;
    }

    match run_session(&cli, &config).await {
        Ok(outcome) => {
            println!("session {outcome}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
