//! Command-line interface for the vAccel plugin loader.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vaccel_loader::config::env_vars;
use vaccel_loader::{bootstrap, inspect_plugin, LoaderConfig, SystemBackend};

/// vAccel plugin loader - activate and inspect vAccel plugins.
#[derive(Parser, Debug)]
#[command(name = "vaccel-loader")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load the runtime and a plugin, then register and initialize it.
    Activate {
        /// Runtime library (overrides config and environment).
        #[arg(short, long)]
        runtime: Option<String>,

        /// Plugin module path (overrides config and environment).
        #[arg(short, long)]
        plugin: Option<String>,

        /// Name of the exported descriptor symbol.
        #[arg(long)]
        descriptor_symbol: Option<String>,

        /// Accept plugins built for a different vAccel version.
        #[arg(long)]
        version_ignore: bool,
    },

    /// Print a plugin's descriptor without activating it.
    Inspect {
        /// Path to the plugin module.
        #[arg(required = true)]
        path: String,

        /// Name of the exported descriptor symbol.
        #[arg(long)]
        descriptor_symbol: Option<String>,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let result = load_config(args.config.as_ref()).and_then(|config| match args.command {
        Command::Activate {
            runtime,
            plugin,
            descriptor_symbol,
            version_ignore,
        } => {
            let mut config = config;
            if let Some(runtime) = runtime {
                config.runtime_library = runtime;
            }
            if plugin.is_some() {
                config.plugin_path = plugin;
            }
            if let Some(symbol) = descriptor_symbol {
                config.descriptor_symbol = symbol;
            }
            config.version_ignore |= version_ignore;
            run_activate(config)
        }
        Command::Inspect {
            path,
            descriptor_symbol,
            json,
        } => {
            let symbol = descriptor_symbol.unwrap_or(config.descriptor_symbol);
            run_inspect(&path, &symbol, json)
        }
        Command::Config => run_config(&config),
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose {
        "vaccel_loader=debug"
    } else {
        "vaccel_loader=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Defaults, then the config file if given, then the environment.
fn load_config(path: Option<&PathBuf>) -> Result<LoaderConfig> {
    let config = match path {
        Some(path) => LoaderConfig::from_file(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?,
        None => LoaderConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn run_activate(config: LoaderConfig) -> Result<ExitCode> {
    match bootstrap(config) {
        Ok(mut loader) => {
            if let Some(descriptor) = loader.descriptor() {
                let summary = descriptor.summary();
                println!("Activated: {}", descriptor);
                println!("  Type:    {}", summary.plugin_type.join(", "));
                println!("  Virtual: {}", summary.is_virtual);
            }
            if let Some(runtime) = loader.runtime() {
                println!("  Runtime: {}", runtime.target());
            }
            loader.teardown().context("Failed to tear down plugin")?;
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            eprintln!("Stage: {}", failure.stage());
            eprintln!("Error: {}", failure.error);
            if failure.error.is_plugin_reported() {
                eprintln!("The error code was returned by the plugin or runtime.");
            }
            if let Some(mut loader) = failure.loader {
                if let Err(e) = loader.teardown() {
                    tracing::warn!("Teardown after failure: {}", e);
                }
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_inspect(path: &str, symbol: &str, json: bool) -> Result<ExitCode> {
    let summary = inspect_plugin(&SystemBackend, path, symbol)
        .with_context(|| format!("Failed to inspect {}", path))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(ExitCode::SUCCESS);
    }

    let unknown = "<unknown>";
    println!("Plugin:        {}", summary.name.as_deref().unwrap_or(unknown));
    println!("Version:       {}", summary.version.as_deref().unwrap_or(unknown));
    println!(
        "vAccel:        {}",
        summary.vaccel_version.as_deref().unwrap_or(unknown)
    );
    println!("Type:          {}", summary.plugin_type.join(", "));
    println!("Virtual:       {}", summary.is_virtual);
    println!("Has fini:      {}", summary.has_fini);
    Ok(ExitCode::SUCCESS)
}

fn run_config(config: &LoaderConfig) -> Result<ExitCode> {
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}
