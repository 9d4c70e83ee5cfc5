use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use combinecrab_core::config::{DEFAULT_BROKER_ADDRESS, DEFAULT_CONTROL_TOPIC};
use combinecrab_core::control::{ControlBrokerServer, publish_once};
use combinecrab_core::{PreAggregateConfig, PreAggregateStrategy};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod demo;

#[derive(Parser, Debug)]
#[command(name = "combinecrab")]
#[command(about = "Adaptive pre-aggregation CLI", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control broker
    Broker {
        #[arg(long, default_value = DEFAULT_BROKER_ADDRESS)]
        listen: SocketAddr,
    },
    /// Publish a threshold adjustment
    Publish {
        #[arg(long, default_value = DEFAULT_BROKER_ADDRESS)]
        broker: String,
        #[arg(long, default_value = DEFAULT_CONTROL_TOPIC)]
        topic: String,
        /// Signed delta applied to the current threshold
        #[arg(long, allow_hyphen_values = true)]
        value: i64,
    },
    /// Run the sensor-average job
    Demo {
        #[arg(long, default_value_t = 2)]
        parallelism: usize,
        #[arg(long, default_value = "GLOBAL")]
        strategy: PreAggregateStrategy,
        #[arg(long, default_value_t = demo::DEFAULT_MAX_COUNT)]
        max_count: u64,
        #[arg(long)]
        max_time_ms: Option<u64>,
        /// Control broker; without it thresholds stay static
        #[arg(long)]
        broker: Option<String>,
        /// JSON pre-aggregate config; overrides the threshold flags
        #[arg(long)]
        config: Option<PathBuf>,
        /// Text file of `id;value|id;value` lines; synthetic data if absent
        #[arg(long)]
        input: Option<PathBuf>,
        /// Synthetic lines to generate
        #[arg(long, default_value_t = 10_000)]
        records: usize,
        /// Pause between source lines
        #[arg(long, default_value_t = 0)]
        pooling_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    match cli.command {
        Commands::Broker { listen } => {
            println!("control broker listening on {}", listen);
            println!(
                "adjust with: combinecrab publish --broker {} --topic {} --value -10",
                listen, DEFAULT_CONTROL_TOPIC
            );
            ControlBrokerServer::new().serve_addr(listen).await?;
        }
        Commands::Publish {
            broker,
            topic,
            value,
        } => {
            publish_once(&broker, &topic, value.to_string()).await?;
            println!("published {} on '{}' via {}", value, topic, broker);
        }
        Commands::Demo {
            parallelism,
            strategy,
            max_count,
            max_time_ms,
            broker,
            config,
            input,
            records,
            pooling_ms,
        } => {
            let mut pre_aggregate = match config {
                Some(path) => {
                    let json = std::fs::read_to_string(&path)
                        .with_context(|| format!("cannot read {}", path.display()))?;
                    PreAggregateConfig::from_json(&json)?
                }
                None => {
                    let mut config = PreAggregateConfig::new(max_count).with_strategy(strategy);
                    if let Some(ms) = max_time_ms {
                        config = config.with_max_time(Duration::from_millis(ms));
                    }
                    config
                }
            };
            if let Some(address) = &broker {
                pre_aggregate = pre_aggregate.with_broker_address(address.clone());
            }
            let options = demo::DemoOptions {
                parallelism,
                config: pre_aggregate,
                adaptive: broker.is_some(),
                input,
                records,
                pooling: Duration::from_millis(pooling_ms),
            };
            let report = tokio::task::spawn_blocking(move || demo::run(options)).await??;
            report.print();
        }
    }
    Ok(())
}
