pub mod bbox;
#[cfg(feature = "opencv")]
pub mod capture;
pub mod config;
pub mod control;
pub mod detection;
pub mod detector;
pub mod error;
pub mod feature;
pub mod frame;
pub mod lane;
pub mod math;
pub mod remote;
pub mod robot;
pub mod sink;
pub mod thing;
pub mod track_list;

mod circular_queue;

pub use config::Config;
pub use control::Control;
pub use detection::Detection;
pub use detector::{DetectorOracle, DetectorRequest, NoDetector, YoloDecoder};
pub use error::Error;
pub use feature::{Feature, Kind, Record, Rgb};
pub use frame::{Camera, Frame, ImageFrame, NoCamera};
pub use lane::{LaneDetector, LaneKind, LaneList};
pub use remote::{Remote, RemoteMessage};
pub use robot::{Node, PipeNode, ProgramCatalogue, Robot};
pub use sink::{PipeSink, Sink, TopicSink};
pub use thing::{ObjectDetector, ThingKind, ThingList};
pub use track_list::{CenterHue, Detect, Similarity, TrackList};
