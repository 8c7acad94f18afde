use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use shotcopy_core::capture;
use shotcopy_core::config::CaptureConfig;
use shotcopy_platform::output::OutputSummary;

#[derive(Parser, Debug)]
#[command(name = "shotcopy")]
#[command(about = "Capture a still frame of a Wayland output to PNG")]
#[command(version)]
struct Cli {
    /// Output to capture (e.g., DP-2); exact, case-sensitive name
    #[arg(long, short = 'o', env = "SHOTCOPY_OUTPUT")]
    output: Option<String>,

    /// Composite the cursor into the capture
    #[arg(long)]
    cursor: bool,

    /// PNG file to write
    #[arg(long, env = "SHOTCOPY_PATH")]
    path: Option<PathBuf>,

    /// Path to config file
    #[arg(long, env = "SHOTCOPY_CONFIG_PATH", global = true)]
    config_path: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "SHOTCOPY_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the compositor's outputs
    List {
        /// Print JSON instead of one line per output
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("shotcopy v{} starting", env!("CARGO_PKG_VERSION"));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("shotcopy: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Some(Commands::List { json }) = cli.command {
        let outputs = capture::available_outputs().await?;
        print_outputs(&outputs, json)?;
        return Ok(());
    }

    let config = resolve_config(&cli)?;
    info!(
        "capturing {} (cursor={}) to {}",
        config.target_output,
        config.overlay_cursor,
        config.output_path.display()
    );

    // The capture itself cannot be cancelled; an interrupt ends the process.
    let summary = tokio::select! {
        result = capture::take_screenshot(config) => result?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("shotcopy: interrupted");
            std::process::exit(130);
        }
    };

    println!(
        "Screenshot of {} ({}x{}) saved to {}",
        summary.output,
        summary.width,
        summary.height,
        summary.path.display()
    );
    Ok(())
}

/// Config file values, overridden by CLI arguments
fn resolve_config(cli: &Cli) -> Result<CaptureConfig> {
    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(CaptureConfig::default_path);

    let mut config = if config_path.exists() {
        info!("loading config from {}", config_path.display());
        CaptureConfig::load(&config_path)?
    } else if cli.config_path.is_some() {
        bail!("config file {} does not exist", config_path.display());
    } else {
        CaptureConfig::default()
    };

    if let Some(output) = &cli.output {
        config.target_output = output.clone();
    }
    if cli.cursor {
        config.overlay_cursor = true;
    }
    if let Some(path) = &cli.path {
        config.output_path = path.clone();
    }

    if config.target_output.is_empty() {
        bail!("output name is required (--output or config file)");
    }
    Ok(config)
}

fn print_outputs(outputs: &[OutputSummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outputs)?);
        return Ok(());
    }
    for output in outputs {
        let mode = output
            .mode
            .map(|(w, h)| format!("{}x{}", w, h))
            .unwrap_or_else(|| "-".to_string());
        match &output.description {
            Some(desc) => println!("{}\t{}\t{}", output.name, mode, desc),
            None => println!("{}\t{}", output.name, mode),
        }
    }
    Ok(())
}
