//! partinject command-line interface for deploy steps and disk injection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use partinject_core::{
    config::{InjectConfig, DEFAULT_CONFIG_PATH},
    logging, with_partition_path, FileMap, StepRegistry,
};
use partinject_system::{system_inject_provider, SystemBlockDevices, SystemMounter};
use schemars::schema_for;
use serde_json::{to_string_pretty, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "partinject",
    version,
    about = "Locate a directory on an imaged disk and inject files beneath it."
)]
struct Cli {
    /// Path to the partinject configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the deploy steps offered by the registered providers.
    Steps,

    /// Dispatch a deploy step through the registry.
    RunStep {
        /// Step name (e.g. inject_files).
        step: String,

        /// JSON file holding the step arguments object.
        #[arg(long)]
        args: PathBuf,
    },

    /// Write a file map into the partition holding the target directory.
    Inject {
        /// JSON object mapping destination paths to base64 content.
        #[arg(long)]
        files: PathBuf,
    },

    /// Report which partition holds `path`, then unmount it.
    Locate {
        /// Directory to look for, relative to the partition root.
        path: String,
    },

    /// Print the JSON schema of the configuration file.
    Schema,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Schema => {
            let schema = schema_for!(InjectConfig);
            println!("{}", to_string_pretty(&schema)?);
        }
        Commands::Steps => {
            let registry = build_registry(&load_config(&cli.config)?)?;
            println!("{}", to_string_pretty(&registry.deploy_steps())?);
        }
        Commands::RunStep { step, args } => {
            let registry = build_registry(&load_config(&cli.config)?)?;
            let args: Value = read_json(&args)?;
            registry
                .dispatch(&step, &args)
                .with_context(|| format!("step {step} failed"))?;
            println!("step {step} completed");
        }
        Commands::Inject { files } => {
            let config = load_config(&cli.config)?;
            let files: FileMap = read_json(&files)?;
            let provider = system_inject_provider(&config)?;
            provider
                .inject(&files)
                .with_context(|| format!("failed to inject {} file(s)", files.len()))?;
            println!(
                "injected {} file(s) next to /{}",
                files.len(),
                provider.target_dir()
            );
        }
        Commands::Locate { path } => {
            let config = load_config(&cli.config)?;
            let devices = SystemBlockDevices::from_config(&config)?;
            let mounter = SystemMounter::from_config(&config)?;
            let (device, partition) = with_partition_path(&devices, &mounter, &path, |found| {
                info!("found {} at {}", path, found.path.display());
                Ok((found.partition_device.to_string(), found.partition.to_string()))
            })
            .with_context(|| format!("failed to locate {path}"))?;
            println!("{device}: {partition}");
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<InjectConfig> {
    let config = InjectConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    info!("configuration source: {}", config.path.display());
    Ok(config)
}

fn build_registry(config: &InjectConfig) -> Result<StepRegistry> {
    let mut registry = StepRegistry::new();
    registry.register(Box::new(system_inject_provider(config)?));
    info!("{} deploy step provider(s) registered", registry.len());
    Ok(registry)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}
