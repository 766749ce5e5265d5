//! Probe CLI for the resilience engine.
//!
//! Runs synthetic operations through a configured `TimeoutEngine` and prints
//! every `TimeoutResult` plus the resulting latency stats as JSON. Useful for
//! checking how a config file behaves before shipping it.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};

use resilience_engine::config::{load_config, EngineConfig, Strategy};
use resilience_engine::observability::{logging, metrics};
use resilience_engine::resilience::timeouts::secs_to_duration;
use resilience_engine::resilience::{
    default_engine, install_default_engine, with_timeout, ExecuteOptions, TimeoutEngine,
    TimeoutResult,
};

#[derive(Parser)]
#[command(name = "resilience-engine")]
#[command(
    about = "Probe the timeout and retry engine with synthetic operations",
    long_about = None
)]
struct Cli {
    /// Engine configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Expose Prometheus metrics on this address.
    #[arg(long)]
    metrics_address: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic operation through the engine
    Simulate(SimulateArgs),
    /// Validate a configuration file and print the effective settings
    CheckConfig {
        path: PathBuf,
    },
}

#[derive(Args)]
struct SimulateArgs {
    /// Operation name used for stats and overrides.
    #[arg(long, default_value = "probe")]
    name: String,

    /// Seconds each call takes.
    #[arg(long, default_value_t = 0.1)]
    latency: f64,

    /// Number of initial calls that take `slow_latency` instead.
    #[arg(long, default_value_t = 0)]
    slow_calls: u32,

    #[arg(long, default_value_t = 5.0)]
    slow_latency: f64,

    /// Return an error instead of a value.
    #[arg(long)]
    fail: bool,

    /// Panic instead of returning.
    #[arg(long, conflicts_with = "fail")]
    panic: bool,

    /// Explicit timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Use the blocking path.
    #[arg(long)]
    sync: bool,

    /// Number of engine calls to make.
    #[arg(long, default_value_t = 1)]
    runs: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    FailFast,
    RetryWithBackoff,
    GracefulDegradation,
    ExtendTimeout,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::FailFast => Strategy::FailFast,
            StrategyArg::RetryWithBackoff => Strategy::RetryWithBackoff,
            StrategyArg::GracefulDegradation => Strategy::GracefulDegradation,
            StrategyArg::ExtendTimeout => Strategy::ExtendTimeout,
        }
    }
}

/// Behaviour of the synthetic operation.
#[derive(Clone)]
struct Synthetic {
    calls: Arc<AtomicU32>,
    latency: f64,
    slow_calls: u32,
    slow_latency: f64,
    fail: bool,
    panic: bool,
}

impl Synthetic {
    fn from_args(args: &SimulateArgs) -> Self {
        Self {
            calls: Arc::new(AtomicU32::new(0)),
            latency: args.latency,
            slow_calls: args.slow_calls,
            slow_latency: args.slow_latency,
            fail: args.fail,
            panic: args.panic,
        }
    }

    /// Register a call, returning its 1-based number and how long it takes.
    fn begin(&self) -> (u32, f64) {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = if n < self.slow_calls { self.slow_latency } else { self.latency };
        (n + 1, latency)
    }

    fn finish(&self, call: u32) -> Result<u32, io::Error> {
        if self.panic {
            panic!("synthetic panic on call {call}");
        }
        if self.fail {
            return Err(io::Error::other(format!("synthetic failure on call {call}")));
        }
        Ok(call)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    logging::init_logging(&config.observability);

    tracing::info!(
        default_timeout_secs = config.timeouts.default_timeout_secs,
        max_timeout_secs = config.timeouts.max_timeout_secs,
        strategy = %config.timeouts.strategy,
        "Configuration loaded"
    );

    let metrics_address = match cli.metrics_address {
        Some(addr) => Some(addr),
        None if config.observability.metrics_enabled => {
            match config.observability.metrics_address.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::error!(
                        metrics_address = %config.observability.metrics_address,
                        "Failed to parse metrics address"
                    );
                    None
                }
            }
        }
        None => None,
    };
    if let Some(addr) = metrics_address {
        metrics::init_metrics(addr);
    }

    match cli.command {
        Commands::Simulate(args) => simulate(config, args).await,
        Commands::CheckConfig { path } => {
            let checked = load_config(&path)?;
            println!("{}", serde_json::to_string_pretty(&checked)?);
            Ok(())
        }
    }
}

async fn simulate(
    config: EngineConfig,
    args: SimulateArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    install_default_engine(TimeoutEngine::new(config.timeouts));
    let engine = default_engine();
    let synthetic = Synthetic::from_args(&args);
    let strategy = args.strategy.map(Strategy::from);

    for _ in 0..args.runs {
        let result: TimeoutResult<u32> = if args.sync {
            let engine = Arc::clone(&engine);
            let synthetic = synthetic.clone();
            let name = args.name.clone();
            let options = ExecuteOptions {
                timeout: args.timeout,
                context: None,
                strategy,
            };
            tokio::task::spawn_blocking(move || {
                let op = move || {
                    let (call, latency) = synthetic.begin();
                    std::thread::sleep(secs_to_duration(latency));
                    synthetic.finish(call)
                };
                engine.execute_sync_with(op, &name, options)
            })
            .await?
        } else {
            let synthetic = synthetic.clone();
            let mut guarded = with_timeout(move || {
                let synthetic = synthetic.clone();
                async move {
                    let (call, latency) = synthetic.begin();
                    tokio::time::sleep(secs_to_duration(latency)).await;
                    synthetic.finish(call)
                }
            })
            .named(args.name.clone());
            if let Some(strategy) = strategy {
                guarded = guarded.strategy(strategy);
            }
            if let Some(timeout) = args.timeout {
                guarded = guarded.timeout(timeout);
            }
            guarded.call().await
        };

        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    match engine.get_operation_stats(&args.name) {
        Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
        None => println!("no successful samples recorded for '{}'", args.name),
    }
    Ok(())
}
