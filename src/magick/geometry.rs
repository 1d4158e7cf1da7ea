//! Bounding box geometry reported by `identify -format %@`.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::error::ToolFailure;

/// `<width>x<height>+<left>+<top>`, e.g. `26x94+0+830`.
static GEOMETRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)x(\d+)\+(\d+)\+(\d+)").expect("geometry pattern is valid")
});

/// Rectangle enclosing the highlighted pixels of a diff image.
///
/// `right` and `bottom` are always derived from the other fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    /// Left edge, in pixels
    pub left: u32,
    /// Top edge, in pixels
    pub top: u32,
    /// Width, in pixels
    pub width: u32,
    /// Height, in pixels
    pub height: u32,
    /// `left + width`
    pub right: u32,
    /// `top + height`
    pub bottom: u32,
}

impl BoundingBox {
    /// Build a box from its origin and size. Returns `None` if an edge overflows.
    #[must_use]
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Option<Self> {
        Some(Self {
            left,
            top,
            width,
            height,
            right: left.checked_add(width)?,
            bottom: top.checked_add(height)?,
        })
    }

    /// Parse a geometry string such as `26x94+0+830`.
    #[must_use]
    pub fn from_geometry(text: &str) -> Option<Self> {
        let caps = GEOMETRY.captures(text.trim_start())?;
        let field = |i: usize| caps.get(i)?.as_str().parse::<u32>().ok();
        Self::new(field(3)?, field(4)?, field(1)?, field(2)?)
    }

    /// Whether the box covers no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Parse geometry output from `program`, reporting a protocol violation as a
/// [`ToolFailure::UnexpectedOutput`].
pub fn parse_geometry(program: &str, output: &str) -> Result<BoundingBox, ToolFailure> {
    BoundingBox::from_geometry(output).ok_or_else(|| ToolFailure::UnexpectedOutput {
        program: program.to_string(),
        output: output.to_string(),
    })
}
