//! Calibration session state machine and event loop
//!
//! A [`CalibrationSession`] owns the canvas and every piece of calibration
//! state. It is driven by [`Command`]s processed one at a time on a single
//! thread by [`run_event_loop`]; display surfaces only ever see published
//! frames and replies.

use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::calibration::{extend_to_bottom, ClickedQuadrilateral, Corner, SourceQuadrilateral};
use crate::config::{Config, Point};
use crate::error::{LoadError, SessionError};
use crate::npy;
use crate::overlay::{Pen, EXTENSION_COLOR, POINT_COLOR};
use crate::transform::PerspectiveTransform;

/// Startup instructions shown to the operator
pub const INSTRUCTIONS: [&str; 5] = [
    "1. Click top left point",
    "2. Press 'r' to reset if you make a mistake",
    "3. Press 'p' to preview transformation",
    "4. Press 's' to save when done",
    "5. Press 'q' to quit",
];

/// Input events understood by the session
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Click { x: f64, y: f64 },
    Reset,
    Preview,
    Save,
    Quit,
    Ignore,
}

impl Command {
    /// Map a key press to a command
    pub fn from_key(key: &str) -> Self {
        match key {
            "r" | "R" => Command::Reset,
            "p" | "P" => Command::Preview,
            "s" | "S" => Command::Save,
            "q" | "Q" => Command::Quit,
            _ => Command::Ignore,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Fewer than four points clicked
    Collecting,
    /// Four points clicked and the source quadrilateral is defined
    Ready,
    Quit,
}

/// Settings a session needs from the configuration
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub points_file: PathBuf,
    pub preview_width_ratio: f64,
    pub pen: Pen,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            points_file: config.output.points_file.clone(),
            preview_width_ratio: config.preview.width_ratio,
            pen: Pen::from(&config.overlay),
        }
    }
}

/// Point-in-time view of the session
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub state: SessionState,
    pub points: Vec<Point>,
    pub source: Option<SourceQuadrilateral>,
    pub next_corner: Option<Corner>,
    pub width: u32,
    pub height: u32,
}

/// Result of one command
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<PathBuf>,
}

/// Everything a dispatch produced
#[derive(Debug)]
pub struct Outcome {
    pub reply: Reply,
    /// The displayed frame changed
    pub redraw: bool,
    pub preview: Option<RgbImage>,
}

pub struct CalibrationSession {
    image_path: PathBuf,
    /// Image with clicked points and edges drawn on it
    canvas: RgbImage,
    /// Canvas copy showing the extended lateral edges, once ready
    overlay: Option<RgbImage>,
    clicked: ClickedQuadrilateral,
    source: Option<SourceQuadrilateral>,
    options: SessionOptions,
    quit: bool,
    messages: Vec<String>,
}

/// Decode an image file into an RGB canvas
pub fn load_image(path: &Path) -> Result<RgbImage, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.to_path_buf()));
    }
    let image = image::open(path).map_err(|source| LoadError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgb8())
}

impl CalibrationSession {
    /// Load the calibration image and start collecting points
    pub fn open(image_path: &Path, options: SessionOptions) -> Result<Self, LoadError> {
        let canvas = load_image(image_path)?;
        info!("Loaded image with shape: {}x{}", canvas.width(), canvas.height());

        Ok(Self {
            image_path: image_path.to_path_buf(),
            canvas,
            overlay: None,
            clicked: ClickedQuadrilateral::new(),
            source: None,
            options,
            quit: false,
            messages: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    pub fn state(&self) -> SessionState {
        if self.quit {
            SessionState::Quit
        } else if self.source.is_some() {
            SessionState::Ready
        } else {
            SessionState::Collecting
        }
    }

    pub fn points(&self) -> &[Point] {
        self.clicked.points()
    }

    pub fn source(&self) -> Option<&SourceQuadrilateral> {
        self.source.as_ref()
    }

    /// The frame to display: the extension overlay when ready, else the canvas
    pub fn frame(&self) -> &RgbImage {
        self.overlay.as_ref().unwrap_or(&self.canvas)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state(),
            points: self.clicked.points().to_vec(),
            source: self.source,
            next_corner: self.clicked.next_corner(),
            width: self.width(),
            height: self.height(),
        }
    }

    /// Reply carrying the startup instructions
    pub fn greeting(&mut self) -> Reply {
        self.say("Instructions:");
        for line in INSTRUCTIONS {
            self.say(line);
        }
        Reply {
            snapshot: self.snapshot(),
            messages: std::mem::take(&mut self.messages),
            error: None,
            saved_to: None,
        }
    }

    fn say(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.messages.push(message);
    }

    /// Add a clicked point. Returns whether anything was drawn.
    pub fn click(&mut self, point: Point) -> Result<bool, SessionError> {
        if self.clicked.is_complete() {
            debug!("Ignoring click, all 4 points are set");
            return Ok(false);
        }
        if !point.is_finite() || !point.within(self.width(), self.height()) {
            return Err(SessionError::OutOfBounds {
                x: point.x,
                y: point.y,
                width: self.width(),
                height: self.height(),
            });
        }

        // The fourth point is only accepted if the edges can be extended
        let source = match self.clicked.corners_with(point) {
            Some(corners) => Some(extend_to_bottom(&corners, self.height())?),
            None => None,
        };

        self.clicked.push(point);
        let pen = self.options.pen;
        pen.marker(&mut self.canvas, point, POINT_COLOR);
        pen.polyline(&mut self.canvas, self.clicked.points(), self.clicked.is_complete(), POINT_COLOR);

        if let Some(source) = source {
            self.apply_source(source);
        }

        let (x, y) = point.to_pixel();
        self.say(format!("Added point {}: [{}, {}]", self.clicked.len(), x, y));
        match self.clicked.next_corner() {
            Some(corner) => self.say(corner.prompt()),
            None => self.say("Press 'p' to preview or 's' to save"),
        }

        Ok(true)
    }

    fn apply_source(&mut self, source: SourceQuadrilateral) {
        let pen = self.options.pen;
        let mut overlay = self.canvas.clone();
        pen.polyline(&mut overlay, self.clicked.points(), true, POINT_COLOR);

        let bottom_y = self.height() as f64;
        let left = Point::new(source.bottom_left().x.trunc(), bottom_y);
        let right = Point::new(source.bottom_right().x.trunc(), bottom_y);
        pen.segment(&mut overlay, source.top_left(), left, EXTENSION_COLOR);
        pen.segment(&mut overlay, source.top_right(), right, EXTENSION_COLOR);

        self.overlay = Some(overlay);
        self.source = Some(source);

        self.say("Extended points calculated:");
        let (lx, ly) = source.bottom_left().to_pixel();
        let (rx, ry) = source.bottom_right().to_pixel();
        self.say(format!("Bottom left intersection: [{}, {}]", lx, ly));
        self.say(format!("Bottom right intersection: [{}, {}]", rx, ry));
    }

    /// Reload the image from disk and discard all points
    pub fn reset(&mut self) -> Result<(), SessionError> {
        self.canvas = load_image(&self.image_path)?;
        if !self.clicked.is_empty() {
            debug!("Discarding {} points", self.clicked.len());
        }
        self.overlay = None;
        self.clicked.clear();
        self.source = None;
        self.say("Reset points");
        self.say(Corner::TopLeft.prompt());
        Ok(())
    }

    /// Rectify the canvas through the source quadrilateral
    pub fn preview(&mut self) -> Result<RgbImage, SessionError> {
        let source = self.source.ok_or(SessionError::Precondition {
            action: "preview transformation",
            points: self.clicked.len(),
        })?;

        let height = self.height();
        let width = ((height as f64 * self.options.preview_width_ratio).floor() as u32).max(1);
        let transform = PerspectiveTransform::to_rectangle(source.as_tuples(), width, height)?;
        let warped = transform.warp(&self.canvas);

        for point in self.clicked.points() {
            if let Some((x, y)) = transform.transform_point(point.x, point.y) {
                debug!("[{}, {}] rectifies to [{:.1}, {:.1}]", point.x, point.y, x, y);
            }
        }

        self.say(format!("Preview {}x{}", width, height));
        Ok(warped)
    }

    /// Print the source quadrilateral and persist it, overwriting any
    /// previous file
    pub fn save(&mut self) -> Result<PathBuf, SessionError> {
        let source = self.source.ok_or(SessionError::Precondition {
            action: "save",
            points: self.clicked.len(),
        })?;

        let path = self.options.points_file.clone();
        npy::save(&path, &source.to_array()).map_err(|source| SessionError::Save {
            path: path.clone(),
            source,
        })?;

        let literal = source.to_literal();
        println!("\nSOURCE points for your script:\n{}", literal);

        self.messages.push("SOURCE points for your script:".to_string());
        self.messages.extend(literal.lines().map(str::to_string));
        self.say(format!("Points saved to '{}'", path.display()));
        Ok(path)
    }

    /// Apply one command and report what changed
    pub fn dispatch(&mut self, command: Command) -> Outcome {
        let mut redraw = false;
        let mut preview = None;
        let mut saved_to = None;

        let result = match command {
            Command::Click { x, y } => self.click(Point::new(x, y)).map(|drawn| redraw = drawn),
            Command::Reset => self.reset().map(|()| redraw = true),
            Command::Preview => self.preview().map(|image| preview = Some(image)),
            Command::Save => self.save().map(|path| saved_to = Some(path)),
            Command::Quit => {
                self.quit = true;
                self.say("Quitting");
                Ok(())
            }
            Command::Ignore => Ok(()),
        };

        let error = result.err().map(|e| {
            let message = e.to_string();
            warn!("{}", message);
            self.messages.push(message.clone());
            message
        });

        Outcome {
            reply: Reply {
                snapshot: self.snapshot(),
                messages: std::mem::take(&mut self.messages),
                error,
                saved_to,
            },
            redraw,
            preview,
        }
    }
}

/// Where the session's frames and replies are displayed
pub trait Surface {
    fn show_canvas(&self, frame: &RgbImage);
    fn show_preview(&self, frame: &RgbImage);
    fn publish(&self, reply: &Reply);
}

/// A command together with the channel its reply goes to
#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub reply: oneshot::Sender<Reply>,
}

impl Request {
    pub fn new(command: Command) -> (Self, oneshot::Receiver<Reply>) {
        let (reply, rx) = oneshot::channel();
        (Self { command, reply }, rx)
    }
}

/// Process requests until a quit command arrives or all senders are gone.
///
/// Blocks the calling thread; run it on a dedicated thread, not inside the
/// async runtime.
pub fn run_event_loop<S: Surface>(
    mut session: CalibrationSession,
    surface: &S,
    mut requests: mpsc::Receiver<Request>,
) {
    surface.show_canvas(session.frame());
    let greeting = session.greeting();
    surface.publish(&greeting);

    while let Some(Request { command, reply }) = requests.blocking_recv() {
        debug!("Command: {:?}", command);
        let outcome = session.dispatch(command);

        if outcome.redraw {
            surface.show_canvas(session.frame());
        }
        if let Some(preview) = &outcome.preview {
            surface.show_preview(preview);
        }
        surface.publish(&outcome.reply);

        if reply.send(outcome.reply).is_err() {
            debug!("Requester went away before the reply was sent");
        }
        if session.state() == SessionState::Quit {
            break;
        }
    }

    info!("Calibration session ended");
}
