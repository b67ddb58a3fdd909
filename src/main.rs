//! # vnstate
//!
//! Convergence stress harness for the replicated MAC table. Runs several
//! replicas, each with its own store session, against one in-memory
//! store and reports how quickly they agree.
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use stress_test::{stress_test_mac_table, stress_test_scaling, StressParams};
use tracing_subscriber::EnvFilter;
use vns_replicated::ReplicatedConfig;

pub mod stress_test;

#[derive(Parser)]
#[command(name = "vnstate")]
#[command(about = "Replicated virtual network state: convergence stress harness")]
#[command(version)]
struct Cli {
    /// JSON file with engine configuration (entry mode, retry policies)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one stress test and print its statistics
    Stress {
        #[arg(long, default_value_t = 4)]
        replicas: usize,
        #[arg(long, default_value_t = 200)]
        ops: usize,
        #[arg(long, default_value_t = 64)]
        keys: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Expire the first replica's session after this many operations
        #[arg(long)]
        expire_after: Option<usize>,
    },
    /// Repeat the stress test with a growing number of replicas
    Scaling {
        #[arg(long, default_value_t = 12)]
        max_replicas: usize,
        #[arg(long, default_value_t = 2)]
        step: usize,
        #[arg(long, default_value_t = 100)]
        ops: usize,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ReplicatedConfig> {
    let Some(path) = path else {
        return Ok(ReplicatedConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    rt.block_on(async_main(cli.command, config))
}

async fn async_main(command: Commands, config: ReplicatedConfig) -> anyhow::Result<()> {
    match command {
        Commands::Stress {
            replicas,
            ops,
            keys,
            seed,
            expire_after,
        } => {
            let stats = stress_test_mac_table(StressParams {
                num_replicas: replicas,
                ops_per_replica: ops,
                num_keys: keys,
                seed,
                expire_after,
                config,
                ..StressParams::default()
            })
            .await?;
            stats.print();
            anyhow::ensure!(stats.converged, "replicas did not converge");
        }
        Commands::Scaling {
            max_replicas,
            step,
            ops,
        } => {
            let base = StressParams {
                ops_per_replica: ops,
                config,
                ..StressParams::default()
            };
            let results = stress_test_scaling(max_replicas, step, base).await?;
            anyhow::ensure!(
                results.iter().all(|stats| stats.converged),
                "at least one run did not converge"
            );
        }
    }

    println!("\n✓ All stress tests completed successfully!");
    Ok(())
}
