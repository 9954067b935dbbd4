use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::detector::{DetectorOracle, DetectorRequest};
use crate::error::Error;
use crate::feature::{Feature, Kind};
use crate::frame::Frame;
use crate::track_list::{Detect, Similarity, TrackList};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThingKind {
    Ball = 0,
    Cube = 1,
    Star = 2,
    Other = 9,
}

impl ThingKind {
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => ThingKind::Ball,
            1 => ThingKind::Cube,
            2 => ThingKind::Star,
            _ => ThingKind::Other,
        }
    }
}

impl Kind for ThingKind {
    const TRACKED: &'static [Self] = &[ThingKind::Ball, ThingKind::Cube, ThingKind::Star];
    const OTHER: Self = ThingKind::Other;
    const TTL: u32 = 2;
    const EVENT_WIDTH: usize = 4;

    #[inline]
    fn id(self) -> i32 {
        self as i32
    }

    fn name(self) -> &'static str {
        match self {
            ThingKind::Ball => "Ball",
            ThingKind::Cube => "Cube",
            ThingKind::Star => "Star",
            ThingKind::Other => "Other",
        }
    }

    fn label(feature: &Feature<Self>) -> String {
        format!("{} {:3.2}", feature.kind.name(), feature.confidence)
    }

    fn event_values(feature: &Feature<Self>) -> Vec<i32> {
        let (az, el) = feature.azel();

        vec![feature.conf(), feature.color.hue_bucket(), az, el]
    }
}

/// Object track list.
pub type ThingList<S = crate::track_list::CenterHue> = TrackList<ThingKind, S>;

impl<S: Similarity<ThingKind>> TrackList<ThingKind, S> {
    /// One `[class, conf, color, az, el]` vector per tracked object.
    pub fn detect_events(&self) -> Vec<Vec<i32>> {
        self.iter()
            .filter(|f| f.kind != ThingKind::OTHER)
            .map(|f| {
                let mut event = Vec::with_capacity(1 + ThingKind::EVENT_WIDTH);
                event.push(f.kind.id());
                event.extend(ThingKind::event_values(f));
                event
            })
            .collect()
    }
}

/// Builds object features out of detector answers.
pub struct ObjectDetector<O> {
    oracle: O,
    request: DetectorRequest,
    class_map: Option<Vec<i32>>,
}

impl<O: DetectorOracle> ObjectDetector<O> {
    pub fn new(oracle: O, request: DetectorRequest) -> Self {
        Self {
            oracle,
            request,
            class_map: None,
        }
    }

    /// Raw class `i` becomes kind `class_map[i]`; ids past the end are
    /// kept as they are.
    pub fn with_class_map(mut self, class_map: Vec<i32>) -> Self {
        self.class_map = Some(class_map);
        self
    }

    #[inline]
    pub fn request(&self) -> &DetectorRequest {
        &self.request
    }

    pub fn kind_of(&self, class: i32) -> ThingKind {
        let mapped = match &self.class_map {
            Some(map) if class >= 0 => map.get(class as usize).copied().unwrap_or(class),
            _ => class,
        };

        ThingKind::from_id(mapped)
    }
}

impl<O: DetectorOracle, F: Frame + ?Sized> Detect<ThingKind, F> for ObjectDetector<O> {
    fn detect(&self, frame: &F) -> Result<Vec<Feature<ThingKind>>, Error> {
        let detections = self.oracle.detect(frame.gray(), &self.request)?;
        debug!("detector returned {} boxes", detections.len());

        let mut things = Vec::with_capacity(detections.len());

        for det in detections.into_iter().take(self.request.max_detections) {
            if !det.is_plausible() {
                debug!(
                    "ignoring misshaped {} {:.2} {:?}",
                    det.class,
                    det.confidence,
                    det.ltrb().as_slice()
                );
                continue;
            }

            let thing = Feature::new(self.kind_of(det.class), det.ltrb().to_flipped_xyxy())
                .with_confidence(det.confidence);
            let center = thing.center();
            let thing = thing.with_color(frame.center_color(center.x, center.y));

            debug!("found {}", thing.label());
            things.push(thing);
        }

        Ok(things)
    }
}
