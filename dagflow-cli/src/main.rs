use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use dagflow::observability::{init_tracing, LogFormat, DEFAULT_FILTER};
use dagflow::prelude::*;

#[derive(Parser)]
#[command(name = "dagflow", version, about = "Run configuration-driven node graphs")]
struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArg {
    /// Path to the configuration document (.json, .yaml or .yml)
    #[arg(short, long, env = "DAGFLOW_CONFIG")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration without running it
    Validate {
        #[command(flatten)]
        config: ConfigArg,
    },
    /// Run a configuration
    Run {
        #[command(flatten)]
        config: ConfigArg,
        /// Log the planned sequence without running any node
        #[arg(long)]
        dry_run: bool,
    },
    /// Write the node graph as Graphviz DOT
    Plot {
        #[command(flatten)]
        config: ConfigArg,
        /// Destination file
        #[arg(short, long, default_value = "dag.dot")]
        output: PathBuf,
        /// Number nodes by their position in the run sequence
        #[arg(long)]
        with_sequence: bool,
    },
}

fn load(path: &Path, registries: &Registries) -> anyhow::Result<Configuration> {
    Configuration::load(path, registries).with_context(|| format!("invalid configuration {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(DEFAULT_FILTER, cli.log_format)?;

    let registries = Arc::new(Registries::with_builtins());

    match cli.command {
        Commands::Validate { config } => {
            let configuration = load(&config.config, &registries)?;
            info!(nodes = configuration.declarations().len(), "Configuration is valid");
            println!("{}", configuration.config_hash());
        }
        Commands::Run { config, dry_run } => {
            let configuration = Arc::new(load(&config.config, &registries)?);
            let mut runner = DagRunner::new(configuration, Arc::clone(&registries))?;
            let report = runner.run(RunOptions { dry_run })?;
            println!("{:#}", report.summary());
        }
        Commands::Plot {
            config,
            output,
            with_sequence,
        } => {
            let configuration = Arc::new(load(&config.config, &registries)?);
            let sequence = if with_sequence {
                let runner = DagRunner::new(Arc::clone(&configuration), Arc::clone(&registries))?;
                let candidate = runner.traverser().traversal_list(&configuration)?;
                Some(runner.filter_sequence(&candidate)?)
            } else {
                None
            };
            let dot = configuration.dag().to_dot(sequence.as_deref());
            std::fs::write(&output, dot).with_context(|| format!("could not write {}", output.display()))?;
            info!(path = %output.display(), "Wrote graph");
        }
    }

    Ok(())
}
