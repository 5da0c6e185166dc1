//! Kerberized HDFS Cluster Harness
//!
//! CLI tool that boots the KDC / HDFS / database topology and runs the
//! Kerberos scenario suite against it.
//!
//! Usage:
//!   kdfs-test run --backend sim
//!   kdfs-test run --backend docker --scenario prohibited --output json
//!   kdfs-test list
//!   kdfs-test config > cluster.yaml

use clap::{Parser, Subcommand};
use kerberized_hdfs_harness::harness::cli::{run, RunConfig};
use kerberized_hdfs_harness::harness::config::{BackendKind, ClusterConfig};
use kerberized_hdfs_harness::harness::report::{write_report, OutputFormat};
use kerberized_hdfs_harness::harness::suite::SCENARIOS;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kdfs-test")]
#[command(about = "Kerberized HDFS Cluster Harness")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the cluster and run scenarios
    Run {
        /// Topology to run against: sim, docker
        #[arg(short, long)]
        backend: Option<String>,

        /// Scenario name or 1-based number (can be used multiple times)
        #[arg(short, long)]
        scenario: Vec<String>,

        /// Cluster configuration YAML file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format: text, json
        #[arg(short, long, default_value = "text")]
        output: String,

        /// Seconds to wait for tickets to expire during fault injection
        #[arg(long)]
        expiry_wait: Option<u64>,
    },

    /// List available scenarios
    List,

    /// Print the default cluster configuration as YAML
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Run {
            backend,
            scenario,
            config,
            output,
            expiry_wait,
        } => {
            let output_format = match output.parse::<OutputFormat>() {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(2);
                }
            };
            let backend = match backend.as_deref().map(BackendKind::parse).transpose() {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(2);
                }
            };

            let run_config = RunConfig {
                config_file: config,
                backend,
                scenarios: scenario,
                output_format,
                expiry_wait_secs: expiry_wait,
            };

            let report = match run(&run_config).await {
                Ok(report) => report,
                Err(e) => {
                    eprintln!("Harness error: {}", e);
                    std::process::exit(1);
                }
            };

            let mut stdout = std::io::stdout();
            if let Err(e) = write_report(&report, run_config.output_format, &mut stdout) {
                eprintln!("Failed to write report: {}", e);
                std::process::exit(1);
            }
            if !report.all_passed() {
                std::process::exit(1);
            }
        }

        Commands::List => {
            for (i, info) in SCENARIOS.iter().enumerate() {
                println!("{:>2}. {:<24} {}", i + 1, info.name, info.description);
            }
        }

        Commands::Config => match ClusterConfig::default().to_yaml() {
            Ok(yaml) => print!("{}", yaml),
            Err(e) => {
                eprintln!("Failed to render configuration: {}", e);
                std::process::exit(1);
            }
        },
    }
}
