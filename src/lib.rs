//! webdiff - content identity and perceptual image diffs
//!
//! The core of a local diff viewer: decides cheaply whether two files are
//! byte-identical, and for images drives ImageMagick to produce a highlighted
//! diff image, a dilated copy of it and the bounding box of the changes. Every
//! stage is memoized for the lifetime of a [`service::DiffService`].

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod magick;
pub mod metadata;
pub mod normalize;
pub mod pdiff;
pub mod service;

pub use app::run_app;
pub use error::{DiffError, DiffResult, ToolFailure};
pub use service::DiffService;
