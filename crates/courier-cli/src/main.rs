//! Courier - HTTP download and upload manager
//!
//! Runs transfers on a Courier transfer context with resumable downloads,
//! multipart uploads, retries and progress bars.

mod display;
mod progress;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use courier_config::{Config, ConfigLoader, LoggingConfig};
use courier_engine::MemoryQueue;
use courier_transfer::{
    ChannelListener, DownloadTarget, DownloadWriteMode, TransferContext, TransferRequest,
    TransferState,
};
use courier_types::RetryLimit;
use progress::TransferProgress;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Courier - HTTP download and upload manager
#[derive(Parser)]
#[command(
    name = "courier",
    version = env!("CARGO_PKG_VERSION"),
    about = "HTTP download and upload manager",
    long_about = "Courier downloads and uploads files over HTTP with resumable downloads,\n\
                  multipart uploads, bounded retries and live progress."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a URL
    Get {
        /// URL to download
        url: String,
        /// Destination file
        #[arg(short, long, conflicts_with = "dir")]
        output: Option<PathBuf>,
        /// Destination directory; the file is named after the response
        #[arg(long)]
        dir: Option<PathBuf>,
        /// What to do when the destination exists
        #[arg(short, long, value_enum, default_value = "resume")]
        mode: WriteModeArg,
        /// Retries after the first attempt, -1 for unlimited
        #[arg(short, long, allow_negative_numbers = true)]
        retries: Option<i64>,
        /// Extra request header, `Name: value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Upload files as a multipart form
    Upload {
        /// Upload URL
        url: String,
        /// File to upload, repeatable
        #[arg(short, long = "file", required = true)]
        files: Vec<PathBuf>,
        /// Form field name used for the files
        #[arg(long, default_value = "file")]
        field_name: String,
        /// Extra form field, `name=value`
        #[arg(long = "field")]
        fields: Vec<String>,
        /// Retries after the first attempt, -1 for unlimited
        #[arg(short, long, allow_negative_numbers = true)]
        retries: Option<i64>,
        /// Extra request header, `Name: value`
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum WriteModeArg {
    Overwrite,
    CreateNew,
    Resume,
    Skip,
}

impl From<WriteModeArg> for DownloadWriteMode {
    fn from(mode: WriteModeArg) -> Self {
        match mode {
            WriteModeArg::Overwrite => DownloadWriteMode::Overwrite,
            WriteModeArg::CreateNew => DownloadWriteMode::CreateNew,
            WriteModeArg::Resume => DownloadWriteMode::ResumeDownload,
            WriteModeArg::Skip => DownloadWriteMode::DoNothing,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging, cli.debug, cli.quiet, cli.verbose)?;

    info!("Courier v{} starting", env!("CARGO_PKG_VERSION"));

    let state = match cli.command {
        Commands::Get {
            url,
            output,
            dir,
            mode,
            retries,
            headers,
        } => {
            get_command(&config, url, output, dir, mode, retries, headers, cli.quiet).await?
        }
        Commands::Upload {
            url,
            files,
            field_name,
            fields,
            retries,
            headers,
        } => {
            upload_command(
                &config, url, files, field_name, fields, retries, headers, cli.quiet,
            )
            .await?
        }
        Commands::Config { default } => {
            config_command(&config, default)?;
            return Ok(());
        }
    };

    if state != TransferState::Success {
        bail!("Transfer ended with {}", state);
    }
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => ConfigLoader::load_default().context("Failed to load configuration")?,
    };
    Ok(config)
}

fn init_logging(logging: &LoggingConfig, debug: bool, quiet: bool, verbose: bool) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_ansi(logging.colored_output)
        .with_writer(std::io::stderr);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

fn parse_retries(retries: Option<i64>, fallback: RetryLimit) -> Result<RetryLimit> {
    match retries {
        Some(value) => RetryLimit::try_from(value).map_err(anyhow::Error::msg),
        None => Ok(fallback),
    }
}

fn parse_header(header: &str) -> Result<(String, String)> {
    let (name, value) = header
        .split_once(':')
        .with_context(|| format!("Header '{}' is not in 'Name: value' form", header))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn parse_field(field: &str) -> Result<(String, String)> {
    let (name, value) = field
        .split_once('=')
        .with_context(|| format!("Field '{}' is not in 'name=value' form", field))?;
    Ok((name.to_string(), value.to_string()))
}

#[allow(clippy::too_many_arguments)]
async fn get_command(
    config: &Config,
    url: String,
    output: Option<PathBuf>,
    dir: Option<PathBuf>,
    mode: WriteModeArg,
    retries: Option<i64>,
    headers: Vec<String>,
    quiet: bool,
) -> Result<TransferState> {
    let context = TransferContext::start(config, Arc::new(MemoryQueue::new()))?;

    let target = match output {
        Some(path) => DownloadTarget::File(path),
        None => DownloadTarget::Directory(dir.unwrap_or_else(|| PathBuf::from("."))),
    };
    let mut settings = context.default_settings();
    settings.read_body_mode = courier_transfer::ReadBodyMode::File;
    settings.write_mode = mode.into();
    settings.notify_write = false;
    settings.retry_limit = parse_retries(retries, settings.retry_limit)?;

    let mut request = TransferRequest::download(context.next_id(), url.clone(), target)
        .with_settings(settings);
    for header in &headers {
        let (name, value) = parse_header(header)?;
        request = request.with_header(name, value);
    }

    if !quiet {
        println!(
            "{} Downloading {}",
            style("↓").green().bold(),
            style(&url).cyan()
        );
    }
    run_transfer(&context, request, quiet).await
}

#[allow(clippy::too_many_arguments)]
async fn upload_command(
    config: &Config,
    url: String,
    files: Vec<PathBuf>,
    field_name: String,
    fields: Vec<String>,
    retries: Option<i64>,
    headers: Vec<String>,
    quiet: bool,
) -> Result<TransferState> {
    let context = TransferContext::start(config, Arc::new(MemoryQueue::new()))?;

    let mut settings = courier_transfer::TransferSettings {
        read_body_mode: courier_transfer::ReadBodyMode::String,
        declined_policy: courier_transfer::DeclinedPolicy::Fail,
        notify_read: false,
        ..context.default_settings()
    };
    settings.retry_limit = parse_retries(retries, settings.retry_limit)?;

    let mut request = TransferRequest::upload(context.next_id(), url.clone()).with_settings(settings);
    for field in &fields {
        let (name, value) = parse_field(field)?;
        request = request.with_field(name, value);
    }
    for file in files {
        request = request.with_file(field_name.as_str(), file);
    }
    for header in &headers {
        let (name, value) = parse_header(header)?;
        request = request.with_header(name, value);
    }

    if !quiet {
        println!(
            "{} Uploading to {}",
            style("↑").green().bold(),
            style(&url).cyan()
        );
    }
    run_transfer(&context, request, quiet).await
}

async fn run_transfer(
    context: &TransferContext,
    request: TransferRequest,
    quiet: bool,
) -> Result<TransferState> {
    let (listener, events) = ChannelListener::new();
    let listener = listener.with_interval(Duration::from_millis(200));
    context.add_listener(Arc::new(listener));

    let label = request.label();
    let descriptor = context.submit(request)?;
    let mut progress = TransferProgress::new(label, quiet)?;

    let state = tokio::select! {
        state = progress.follow(events, descriptor.id()) => state,
        _ = tokio::signal::ctrl_c() => {
            context.cancel(descriptor.id());
            TransferState::Cancelled
        }
    };

    context.shutdown().await;
    if !quiet {
        progress.print_summary(state);
    }
    Ok(state)
}

fn config_command(config: &Config, default: bool) -> Result<()> {
    let (title, shown) = if default {
        ("Default configuration:", Config::default())
    } else {
        ("Current configuration:", config.clone())
    };
    println!("{} {}", style("⚙").blue().bold(), title);
    print!("{}", serde_yaml::to_string(&shown)?);
    if !default {
        match ConfigLoader::config_exists() {
            Some(path) => println!("# loaded from {}", path.display()),
            None => println!("# no configuration file found, using defaults"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, RetryLimit::limited(3))]
    #[case(Some(-1), RetryLimit::Unlimited)]
    #[case(Some(0), RetryLimit::None)]
    #[case(Some(5), RetryLimit::Limited(5))]
    fn test_parse_retries(#[case] input: Option<i64>, #[case] expected: RetryLimit) {
        assert_eq!(
            parse_retries(input, RetryLimit::limited(3)).unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_header_and_field() {
        assert_eq!(
            parse_header("Authorization: Bearer x").unwrap(),
            ("Authorization".to_string(), "Bearer x".to_string())
        );
        assert!(parse_header("nonsense").is_err());
        assert_eq!(
            parse_field("album=a=b").unwrap(),
            ("album".to_string(), "a=b".to_string())
        );
    }

    #[test]
    fn test_cli_parses_get() {
        let cli = Cli::try_parse_from([
            "courier", "get", "http://x/a.bin", "--dir", "out", "-m", "create-new", "-r", "-1",
        ])
        .unwrap();
        match cli.command {
            Commands::Get {
                mode, retries, dir, ..
            } => {
                assert_eq!(mode, WriteModeArg::CreateNew);
                assert_eq!(retries, Some(-1));
                assert_eq!(dir, Some(PathBuf::from("out")));
            }
            _ => panic!("expected get"),
        }
    }
}
