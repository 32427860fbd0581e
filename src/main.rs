//! feeprobe CLI
//!
//! Runs the fee estimation scenario or the block statistics check against
//! nodes the operator has already started and connected.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use feeprobe::blockstats::{parse_stat_selection, BlockStatsScenario};
use feeprobe::config::HarnessConfig;
use feeprobe::rpc::BitcoinRpcClient;
use feeprobe::SmartFeeScenario;

/// Main CLI arguments
#[derive(Parser)]
#[command(name = "feeprobe")]
#[command(about = "Workload and validation harness for node fee estimation")]
#[command(version = "0.1.0")]
struct Args {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the workload's random generator (overrides config)
    #[arg(long)]
    seed: Option<u64>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Drive the throughput regimes and check fee estimates after each
    Smartfees,
    /// Query and check block statistics over a height range
    Blockstats {
        /// First height
        #[arg(long)]
        start: i64,
        /// Last height
        #[arg(long)]
        end: i64,
        /// Comma separated statistics to select, e.g. minfee,maxfee
        #[arg(long)]
        stats: Option<String>,
        /// Index of the configured node to query
        #[arg(long, default_value_t = 0)]
        node: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();

    let mut config = match &args.config {
        Some(path) => HarnessConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    match args.command {
        Commands::Smartfees => {
            info!("Running fee estimation scenario with seed {}", config.seed);
            let scenario = SmartFeeScenario::connect(config).context("Failed to connect to nodes")?;
            let report = scenario.run().await.context("Fee estimation scenario failed")?;
            for outcome in &report.phases {
                println!(
                    "miner {} / {} blocks / {} txs: {}",
                    outcome.phase.miner,
                    outcome.workload.blocks,
                    outcome.workload.transactions,
                    outcome.estimates.summary()
                );
            }
            println!("Final estimates for 1/2/3/6/15/25: {}", report.final_estimates.summary());
            println!("{} fee samples over {} split outputs", report.fee_samples, report.split_outputs);
        }
        Commands::Blockstats { start, end, stats, node } => {
            config.validate()?;
            let mut scenario = BlockStatsScenario::new(start, end);
            if let Some(selection) = stats.as_deref() {
                scenario = scenario.with_selection(parse_stat_selection(selection)?);
            }
            let rpc = config
                .rpc_configs()?
                .into_iter()
                .nth(node)
                .with_context(|| format!("No node configured at index {}", node))?;
            let client = BitcoinRpcClient::new(rpc)?;
            let report = scenario.run(&client).await.context("Block stats check failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
