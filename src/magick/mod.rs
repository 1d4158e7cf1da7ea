//! ImageMagick integration.
//!
//! This module owns everything that knows how the image toolkit is invoked:
//!
//! - [`runner`]: process launching with captured output and a timeout
//! - [`geometry`]: parsing of `identify -format %@` output
//! - [`Toolkit`]: the availability probe and the fixed argument lists for
//!   `compare`, `convert` and `identify`
//!
//! The toolkit is noisy; its stdout and stderr are always captured and only
//! surface inside [`ToolFailure::ExitStatus`](crate::error::ToolFailure).

pub mod geometry;
pub mod runner;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub use geometry::{parse_geometry, BoundingBox};
pub use runner::{CommandRunner, SystemRunner, ToolCommand, ToolOutput};

use crate::error::{DiffError, DiffResult, ToolFailure};

/// Dissimilarity metric passed to `compare -metric`.
pub const COMPARE_METRIC: &str = "RMSE";
/// Color used by `compare` to highlight differing pixels.
pub const HIGHLIGHT_COLOR: &str = "Red";
/// Composition mode for the `compare` output image.
pub const COMPOSE_MODE: &str = "Src";
/// Morphology kernel used to dilate diff images.
pub const DILATE_KERNEL: &str = "Disk:5.5";
/// Color every highlighted pixel takes after dilation.
pub const EMPHASIS_COLOR: &str = "Red";

/// `compare` exit code: images are similar.
pub const COMPARE_SIMILAR: i32 = 0;
/// `compare` exit code: images are dissimilar.
pub const COMPARE_DISSIMILAR: i32 = 1;
/// `compare` exit code: the comparison failed.
pub const COMPARE_FAILED: i32 = 2;

/// Names or paths of the toolkit programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPrograms {
    /// `compare` binary
    pub compare: String,
    /// `convert` binary
    pub convert: String,
    /// `identify` binary
    pub identify: String,
}

impl Default for ToolPrograms {
    fn default() -> Self {
        Self {
            compare: "compare".to_string(),
            convert: "convert".to_string(),
            identify: "identify".to_string(),
        }
    }
}

/// Handle to the external image toolkit.
///
/// Availability is probed on first use and remembered, whether the answer is
/// yes or no, until [`reprobe`](Self::reprobe) is called.
pub struct Toolkit {
    runner: Arc<dyn CommandRunner>,
    programs: ToolPrograms,
    timeout: Duration,
    available: Mutex<Option<bool>>,
}

impl std::fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolkit")
            .field("runner", &"<runner>")
            .field("programs", &self.programs)
            .field("timeout", &self.timeout)
            .field("available", &self.available)
            .finish()
    }
}

impl Toolkit {
    /// Create a toolkit handle. Nothing is run until the first probe.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, programs: ToolPrograms, timeout: Duration) -> Self {
        Self {
            runner,
            programs,
            timeout,
            available: Mutex::new(None),
        }
    }

    /// Toolkit programs in use.
    #[must_use]
    pub fn programs(&self) -> &ToolPrograms {
        &self.programs
    }

    /// Whether the toolkit is installed and usable.
    ///
    /// The first call runs `identify --version`; later calls are free.
    /// Concurrent first callers wait for a single probe.
    pub fn is_available(&self) -> bool {
        let mut available = self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(known) = *available {
            return known;
        }

        let probe = ToolCommand::new(&self.programs.identify).arg("--version");
        let result = match self.runner.run(&probe, self.timeout) {
            Ok(output) if output.success() => true,
            Ok(output) => {
                log::debug!("{} exited with {:?}", probe, output.code);
                false
            }
            Err(e) => {
                log::debug!("{} failed: {}", probe, e);
                false
            }
        };
        log::info!(
            "ImageMagick {}",
            if result { "available" } else { "not available; perceptual diffs disabled" }
        );
        *available = Some(result);
        result
    }

    /// Forget the cached probe result so the next call probes again.
    pub fn reprobe(&self) {
        *self
            .available
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Fail with [`DiffError::ToolUnavailable`] unless the toolkit is usable.
    pub fn ensure_available(&self) -> DiffResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(DiffError::ToolUnavailable)
        }
    }

    /// Run a toolkit command with the configured timeout.
    ///
    /// # Errors
    ///
    /// Launch failures and timeouts, as reported by the runner.
    pub fn run(&self, command: &ToolCommand) -> Result<ToolOutput, ToolFailure> {
        log::debug!("running: {}", command);
        let output = self.runner.run(command, self.timeout)?;
        if !output.success() {
            log::debug!("{} exited with {:?}", command.program, output.code);
        }
        Ok(output)
    }

    /// `compare -metric RMSE -highlight-color Red -compose Src <a> <b> <out>`
    #[must_use]
    pub fn compare_command(&self, before: &Path, after: &Path, output: &Path) -> ToolCommand {
        ToolCommand::new(&self.programs.compare)
            .arg("-metric")
            .arg(COMPARE_METRIC)
            .arg("-highlight-color")
            .arg(HIGHLIGHT_COLOR)
            .arg("-compose")
            .arg(COMPOSE_MODE)
            .arg(before)
            .arg(after)
            .arg(output)
    }

    /// `convert <in> -monochrome -negate -morphology Dilate Disk:5.5 -negate
    /// -fill Red -opaque Black <out>`
    #[must_use]
    pub fn dilate_command(&self, input: &Path, output: &Path) -> ToolCommand {
        ToolCommand::new(&self.programs.convert)
            .arg(input)
            .arg("-monochrome")
            .arg("-negate")
            .arg("-morphology")
            .arg("Dilate")
            .arg(DILATE_KERNEL)
            .arg("-negate")
            .arg("-fill")
            .arg(EMPHASIS_COLOR)
            .arg("-opaque")
            .arg("Black")
            .arg(output)
    }

    /// `identify -format %@ <path>`
    #[must_use]
    pub fn geometry_command(&self, path: &Path) -> ToolCommand {
        ToolCommand::new(&self.programs.identify)
            .arg("-format")
            .arg("%@")
            .arg(path)
    }
}
