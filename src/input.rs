//! Resolving the calibration input to a decodable image file
//!
//! Still images are used as-is. For videos, the first frame is extracted with
//! FFmpeg into a fixed file which then serves as the calibration image.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

use crate::error::LoadError;

/// Where the calibration image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameSource {
    Image(PathBuf),
    Video(PathBuf),
}

impl FrameSource {
    /// Produce the path of the image to calibrate on. For a video this writes
    /// its first frame to `first_frame`, replacing any existing file.
    pub fn resolve(&self, first_frame: &Path) -> Result<PathBuf, LoadError> {
        match self {
            FrameSource::Image(path) => {
                info!("Using image: {}", path.display());
                if !path.exists() {
                    return Err(LoadError::NotFound(path.clone()));
                }
                Ok(path.clone())
            }
            FrameSource::Video(path) => {
                info!("Opening video: {}", path.display());
                if !path.exists() {
                    return Err(LoadError::NotFound(path.clone()));
                }
                let ffmpeg = which::which("ffmpeg").map_err(|_| LoadError::FfmpegNotFound)?;
                extract_first_frame(&ffmpeg, path, first_frame)?;
                info!("Successfully read first frame from video");
                Ok(first_frame.to_path_buf())
            }
        }
    }
}

/// Run FFmpeg to decode the first video frame into `output`
pub fn extract_first_frame(ffmpeg: &Path, video: &Path, output: &Path) -> Result<(), LoadError> {
    debug!("Extracting first frame with {}", ffmpeg.display());

    let result = Command::new(ffmpeg)
        .args(["-y", "-v", "error", "-i"])
        .arg(video)
        .args(["-frames:v", "1"])
        .arg(output)
        .output()?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
        return Err(LoadError::FrameUnreadable {
            path: video.to_path_buf(),
            reason: if stderr.is_empty() {
                format!("ffmpeg exited with {}", result.status)
            } else {
                stderr
            },
        });
    }

    if !output.exists() {
        return Err(LoadError::FrameUnreadable {
            path: video.to_path_buf(),
            reason: format!("failed to save first frame to {}", output.display()),
        });
    }

    Ok(())
}
