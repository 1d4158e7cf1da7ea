//! Command-line interface definitions for webdiff.
//!
//! The CLI is a thin harness over [`DiffService`](crate::service::DiffService),
//! useful for scripting and for checking an ImageMagick install.
//!
//! # Example
//!
//! ```bash
//! # Are two files byte-identical? (exit 0 = yes, 2 = no)
//! webdiff identical old/logo.png new/logo.png
//!
//! # Perceptual diff, dilated, with the changed region as JSON
//! webdiff pdiff old/logo.png new/logo.png --dilate --bbox --output json
//!
//! # Is ImageMagick usable?
//! webdiff -v probe
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Compare two versions of a file: content identity and perceptual image diffs.
#[derive(Debug, Parser)]
#[command(name = "webdiff")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH", env = "WEBDIFF_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds an ImageMagick command may run before it is killed
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Maximum entries per cache
    #[arg(long, global = true, value_name = "N")]
    pub cache_capacity: Option<usize>,

    /// Hash files at least this large through mmap (e.g. 64MiB)
    #[arg(long, global = true, value_name = "SIZE", value_parser = parse_size)]
    pub mmap_threshold: Option<u64>,

    /// Directory for generated diff images
    #[arg(long, global = true, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check whether two files have identical content
    Identical(PairArgs),
    /// Generate a perceptual diff image for two images
    Pdiff(PdiffArgs),
    /// Check whether ImageMagick is available
    Probe,
    /// Show file size and image dimensions
    Metadata(MetadataArgs),
    /// Write a key-sorted, indented copy of a JSON file
    NormalizeJson(NormalizeArgs),
}

/// Two files to compare.
#[derive(Debug, Args)]
pub struct PairArgs {
    /// The "before" file
    #[arg(value_name = "BEFORE")]
    pub before: PathBuf,

    /// The "after" file
    #[arg(value_name = "AFTER")]
    pub after: PathBuf,
}

/// Arguments for the pdiff subcommand.
#[derive(Debug, Args)]
pub struct PdiffArgs {
    #[command(flatten)]
    pub pair: PairArgs,

    /// Also produce a dilated diff image with small changes enlarged
    #[arg(long)]
    pub dilate: bool,

    /// Also report the bounding box of the changed region
    #[arg(long)]
    pub bbox: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the metadata subcommand.
#[derive(Debug, Args)]
pub struct MetadataArgs {
    /// File to inspect
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the normalize-json subcommand.
#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// JSON file to normalize
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON for scripting
    Json,
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use webdiff::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("64MiB").unwrap(), 67_108_864);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
