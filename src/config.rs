use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};

use crate::detector::{DetectorRequest, DEFAULT_IOU_THRESHOLD};
use crate::error::Error;
use crate::frame::FRAME_SIZE;
use crate::lane::{LaneDetector, BINS, HISTORY_DEPTH, HOUGH_ITERATIONS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub control: ControlConfig,
    pub detector: DetectorConfig,
    pub lanes: LanesConfig,
    pub robot: RobotConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub freq_hz: f64,

    /// Time left to in-flight cycles on shutdown.
    pub grace_secs: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            freq_hz: 2.0,
            grace_secs: 2.0,
        }
    }
}

impl ControlConfig {
    /// Cycle period; non-positive frequencies fall back to one cycle per
    /// second.
    pub fn period(&self) -> Duration {
        if self.freq_hz > 0.0 && self.freq_hz.is_finite() {
            Duration::from_secs_f64(1.0 / self.freq_hz)
        } else {
            Duration::from_secs(1)
        }
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs_f64(self.grace_secs.max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ONNX model; no model means no object detections.
    pub model: Option<PathBuf>,
    pub camera: i32,
    pub input_size: u32,
    pub classes: Vec<i32>,
    pub class_map: Option<Vec<i32>>,
    pub min_confidence: f32,
    pub max_detections: usize,
    pub iou_threshold: f32,

    /// Only objects below this elevation may become targets.
    pub target_max_elevation: Option<i32>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let request = DetectorRequest::default();

        Self {
            model: None,
            camera: 0,
            input_size: request.input_size,
            classes: request.classes,
            class_map: None,
            min_confidence: request.min_confidence,
            max_detections: request.max_detections,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            target_max_elevation: None,
        }
    }
}

impl DetectorConfig {
    pub fn request(&self) -> DetectorRequest {
        DetectorRequest {
            input_size: self.input_size,
            classes: self.classes.clone(),
            min_confidence: self.min_confidence,
            max_detections: self.max_detections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanesConfig {
    pub iterations: usize,
    pub bins: usize,
    pub history: usize,
    pub frame_width: u32,
}

impl Default for LanesConfig {
    fn default() -> Self {
        Self {
            iterations: HOUGH_ITERATIONS,
            bins: BINS,
            history: HISTORY_DEPTH,
            frame_width: FRAME_SIZE.0,
        }
    }
}

impl LanesConfig {
    pub fn detector(&self) -> LaneDetector {
        LaneDetector::new(self.frame_width)
            .with_iterations(self.iterations)
            .with_history_depth(self.history)
            .with_bins(self.frame_width, self.bins)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Directory scanned for `.aesl` programs.
    pub programs: Option<PathBuf>,

    /// Pipe to the robot bridge; none runs headless.
    pub link: Option<PathBuf>,
    pub default_program: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Pipe,
    Topic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub sink: SinkKind,
    pub fifo: PathBuf,
    pub remote_fifo: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Pipe,
            fifo: PathBuf::from("/run/ucia/detection.fifo"),
            remote_fifo: Some(PathBuf::from("/run/ucia/remote.fifo")),
        }
    }
}
