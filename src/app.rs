//! Command dispatch for the webdiff binary.

use anyhow::{Context, Result};
use bytesize::ByteSize;
use serde::Serialize;
use std::path::Path;

use crate::cli::{Cli, Commands, MetadataArgs, OutputFormat, PairArgs, PdiffArgs};
use crate::config::Config;
use crate::error::{DiffError, ExitCode};
use crate::identity::hash_to_hex;
use crate::logging::init_logging;
use crate::magick::BoundingBox;
use crate::pdiff::{DiffArtifact, DiffOutcome};
use crate::service::DiffService;

/// Run the CLI and return the process exit code.
///
/// # Errors
///
/// Any configuration or pipeline error, with context.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);

    let config = load_config(&cli)?;
    let service = DiffService::new(config);

    match &cli.command {
        Commands::Identical(pair) => identical(&service, pair),
        Commands::Pdiff(args) => pdiff(&service, args),
        Commands::Probe => Ok(probe(&service)),
        Commands::Metadata(args) => metadata(&service, args),
        Commands::NormalizeJson(args) => {
            let path = service
                .normalize_json(&args.path)
                .with_context(|| format!("Failed to normalize {}", args.path.display()))?;
            println!("{}", path.display());
            Ok(ExitCode::Success)
        }
    }
}

/// Apply CLI overrides on top of file and environment configuration.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(secs) = cli.timeout {
        config.tool_timeout_secs = secs;
    }
    if let Some(capacity) = cli.cache_capacity {
        config.cache_capacity = capacity;
    }
    if let Some(threshold) = cli.mmap_threshold {
        config.mmap_threshold = threshold;
    }
    if let Some(dir) = &cli.temp_dir {
        config.temp_dir = Some(dir.clone());
    }
    config.validate().context("Invalid command-line option")?;
    log::debug!("Configuration: {:?}", config);
    Ok(config)
}

fn identical(service: &DiffService, pair: &PairArgs) -> Result<ExitCode> {
    let same = service.are_identical(&pair.before, &pair.after).with_context(|| {
        format!(
            "Failed to compare {} and {}",
            pair.before.display(),
            pair.after.display()
        )
    })?;
    if log::log_enabled!(log::Level::Debug) {
        for path in [&pair.before, &pair.after] {
            let hash = service
                .content_hash(path)
                .with_context(|| format!("Failed to hash {}", path.display()))?;
            log::debug!("{}: blake3 {}", path.display(), hash_to_hex(&hash));
        }
    }
    if same {
        println!("identical");
        Ok(ExitCode::Success)
    } else {
        println!("different");
        Ok(ExitCode::Different)
    }
}

#[derive(Debug, Serialize)]
struct PdiffReport {
    #[serde(flatten)]
    outcome: DiffOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    dilated: Option<DiffArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bbox: Option<BoundingBox>,
}

fn pdiff(service: &DiffService, args: &PdiffArgs) -> Result<ExitCode> {
    let (before, after) = (&args.pair.before, &args.pair.after);
    let outcome = service
        .generate_diff(before, after)
        .with_context(|| describe("diff", before, after))?;

    let diff_path = outcome.artifact().path();
    let dilated = if args.dilate {
        Some(
            service
                .dilate(diff_path)
                .with_context(|| format!("Failed to dilate {}", diff_path.display()))?,
        )
    } else {
        None
    };
    let bbox = if args.bbox {
        Some(
            service
                .extract_bounding_box(diff_path)
                .with_context(|| format!("Failed to measure {}", diff_path.display()))?,
        )
    } else {
        None
    };

    let exit = if outcome.is_identical() {
        ExitCode::Success
    } else {
        ExitCode::Different
    };
    let report = PdiffReport {
        outcome,
        dilated,
        bbox,
    };

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => {
            let verdict = if report.outcome.is_identical() {
                "similar"
            } else {
                "different"
            };
            println!("{}: {}", verdict, report.outcome.artifact().path().display());
            if let Some(dilated) = &report.dilated {
                println!("dilated: {}", dilated.path().display());
            }
            if let Some(b) = &report.bbox {
                println!(
                    "bbox: {}x{}+{}+{} (right {}, bottom {})",
                    b.width, b.height, b.left, b.top, b.right, b.bottom
                );
            }
        }
    }
    Ok(exit)
}

fn describe(what: &str, before: &Path, after: &Path) -> String {
    format!(
        "Failed to {} {} and {}",
        what,
        before.display(),
        after.display()
    )
}

fn probe(service: &DiffService) -> ExitCode {
    if service.is_tool_available() {
        println!("ImageMagick is available");
        ExitCode::Success
    } else {
        println!("{}", DiffError::ToolUnavailable);
        ExitCode::ToolUnavailable
    }
}

fn metadata(service: &DiffService, args: &MetadataArgs) -> Result<ExitCode> {
    let md = service
        .image_metadata(&args.path)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&md)?),
        OutputFormat::Text => {
            print!("{} ({} bytes)", ByteSize::b(md.num_bytes), md.num_bytes);
            match (md.width, md.height) {
                (Some(w), Some(h)) => println!(", {w}x{h}"),
                _ => println!(),
            }
        }
    }
    Ok(ExitCode::Success)
}
