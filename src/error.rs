//! Error kinds surfaced by calibration

use std::path::PathBuf;
use thiserror::Error;

use crate::calibration::Side;

/// The input image (or video frame) could not be obtained
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("File does not exist: {0}")]
    NotFound(PathBuf),
    #[error("Could not load image from {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("FFmpeg binary not found on PATH, it is required to read video files")]
    FfmpegNotFound,
    #[error("Failed to spawn FFmpeg process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Could not read frame from video {path}: {reason}")]
    FrameUnreadable { path: PathBuf, reason: String },
}

/// The clicked points do not define a usable perspective mapping
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("degenerate {0} edge, cannot extrapolate to bottom row")]
    DegenerateEdge(Side),
    #[error("points {0:?} are collinear")]
    Collinear([usize; 3]),
    #[error("homography is singular")]
    Singular,
    #[error("extrapolated {0} edge does not produce a finite coordinate")]
    NonFinite(Side),
}

/// Errors returned by session commands
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("Need 4 points to {action} (have {points})")]
    Precondition { action: &'static str, points: usize },
    #[error("Click at [{x}, {y}] is outside the {width}x{height} image")]
    OutOfBounds { x: f64, y: f64, width: u32, height: u32 },
    #[error("Failed to save points to {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
