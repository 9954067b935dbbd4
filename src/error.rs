use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Yaml Error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Shape Error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCvError(#[from] opencv::Error),

    #[error("Detector Error: {0}")]
    DetectorError(String),

    #[error("Capture Error: {0}")]
    CaptureError(String),

    #[error("no camera available")]
    NoCamera,

    #[error("Robot Error: {0}")]
    RobotError(String),

    #[error("invalid remote message: {0}")]
    RemoteMessage(String),

    #[error("unknown program `{0}`")]
    UnknownProgram(String),
}
