//! savenexus: rewrite NeXus files from histogram data.
//!
//! `convert` copies a NeXus file, rebuilding the rectangular detector banks
//! from a JSON histogram model. `info` prints the tree of a file.
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};
use log::debug;
use savenexus_core::{CancelToken, Progress, Workspace};
use savenexus_io::{convert_with, outline, ConvertOptions, Hdf5Source};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] savenexus_io::Error),

    #[error("Model error: {0}")]
    Core(#[from] savenexus_core::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Rewrite NeXus files with histogram data.
#[derive(Parser)]
#[command(name = "savenexus")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log every link, slab and missing pixel
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a NeXus file, rebuilding rectangular banks from a model
    Convert {
        /// Source NeXus file
        input: PathBuf,

        /// Destination file
        output: PathBuf,

        /// Histogram model (JSON)
        #[arg(short, long)]
        model: PathBuf,

        /// Deflate level for every dataset written
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=9))]
        compress: Option<u8>,

        /// Write counts and errors in separate passes
        #[arg(long)]
        separate: bool,

        /// Copy every dataset verbatim
        #[arg(long)]
        no_rewrite: bool,

        /// Available memory to budget against (bytes) instead of probing
        #[arg(long)]
        memory_budget: Option<u64>,

        /// Fail if the source holds more links than this
        #[arg(long)]
        max_links: Option<usize>,

        /// Assign a dataset to a bank explicitly
        #[arg(long = "bank", value_name = "DATASET=BANK")]
        banks: Vec<String>,
    },

    /// Show the group and dataset tree of a NeXus file
    Info {
        /// NeXus file
        input: PathBuf,
    },
}

/// Logs progress reports at debug level with a running total.
#[derive(Default)]
struct LogProgress {
    done: AtomicUsize,
}

impl Progress for LogProgress {
    fn report_increment(&self, amount: usize, message: &str) {
        let done = self.done.fetch_add(amount, Ordering::Relaxed) + amount;
        debug!("[{}] {}", done, message);
    }
}

fn parse_bank(spec: &str) -> Result<(&str, &str)> {
    spec.split_once('=')
        .filter(|(path, name)| !path.is_empty() && !name.is_empty())
        .ok_or_else(|| CliError::InvalidArgument(format!("expected DATASET=BANK, got {spec:?}")))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Convert {
            input,
            output,
            model,
            compress,
            separate,
            no_rewrite,
            memory_budget,
            max_links,
            banks,
        } => {
            let start = Instant::now();
            let workspace = Workspace::from_file(&model)?;

            let mut options = ConvertOptions::default()
                .with_combined(!separate)
                .with_rewrite_banks(!no_rewrite);
            if let Some(level) = compress {
                options = options.with_compression(level);
            }
            if let Some(bytes) = memory_budget {
                options = options.with_memory_budget_bytes(bytes);
            }
            if let Some(limit) = max_links {
                options = options.with_max_links(limit);
            }
            for spec in &banks {
                let (path, name) = parse_bank(spec)?;
                options = options.with_bank(path, name);
            }

            let progress = LogProgress::default();
            let summary = convert_with(
                &input,
                &output,
                &workspace,
                &options,
                &progress,
                &CancelToken::new(),
            )?;

            println!(
                "Converted {} -> {} in {:.2}s",
                input.display(),
                output.display(),
                start.elapsed().as_secs_f64()
            );
            println!("Groups: {}", summary.groups);
            println!("Datasets: {}", summary.datasets);
            println!("Banks rebuilt: {}", summary.banks_rewritten);
            println!("Links: {}", summary.links);
            if summary.missing_pixels > 0 {
                println!("Pixels without data: {}", summary.missing_pixels);
            }
        }

        Commands::Info { input } => {
            let source = Hdf5Source::open(&input)?;
            println!("File: {}", input.display());
            for line in outline(&source)? {
                println!("  {}", line);
            }
        }
    }

    Ok(())
}
