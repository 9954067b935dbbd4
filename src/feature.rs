use std::fmt;
use std::hash::Hash;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::math;

/// Number of hue buckets reported in the `color` field of a record.
pub const COLOR_BUCKETS: f32 = 12.0;

/// Closed set of feature categories tracked by one list.
///
/// `TRACKED` holds the real kinds in id order; `OTHER` is the sentinel for
/// untracked detections and never takes part in targets or events.
pub trait Kind: Copy + Eq + Ord + Hash + fmt::Debug + Send + Sync + 'static {
    const TRACKED: &'static [Self];
    const OTHER: Self;

    /// Lifetime, in cycles, of a freshly detected feature.
    const TTL: u32;

    /// Number of integers each kind contributes to the event vector.
    const EVENT_WIDTH: usize;

    fn id(self) -> i32;

    fn name(self) -> &'static str;

    fn label(feature: &Feature<Self>) -> String;

    /// Event values of a target; must be `EVENT_WIDTH` long.
    fn event_values(feature: &Feature<Self>) -> Vec<i32>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const BLACK: Rgb = Rgb([0, 0, 0]);

    #[inline]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// HLS hue in `[0, 1)`.
    #[inline]
    pub fn hue(&self) -> f32 {
        math::rgb_to_hue(self.0[0], self.0[1], self.0[2])
    }

    #[inline]
    pub fn hue_bucket(&self) -> i32 {
        ((self.hue() * COLOR_BUCKETS) as i32).min(COLOR_BUCKETS as i32 - 1)
    }
}

/// A detection with identity carried across cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature<K: Kind> {
    pub kind: K,

    /// (x1, y2, x2, y1): the vertical axis is flipped so that the second
    /// value is the visual bottom edge.
    pub xyxy: [i32; 4],
    pub color: Rgb,
    pub confidence: f32,
    pub target: bool,
    pub ttl: u32,

    // lane direction in radians, lanes only
    pub slope: Option<f32>,
}

impl<K: Kind> Feature<K> {
    pub fn new(kind: K, xyxy: [i32; 4]) -> Self {
        Self {
            kind,
            xyxy,
            color: Rgb::BLACK,
            confidence: 0.0,
            target: false,
            ttl: K::TTL,
            slope: None,
        }
    }

    #[inline]
    pub fn with_color(mut self, color: Rgb) -> Self {
        self.color = color;
        self
    }

    #[inline]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    #[inline]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    #[inline]
    pub fn with_slope(mut self, slope: f32) -> Self {
        self.slope = Some(slope);
        self
    }

    #[inline]
    pub fn center(&self) -> na::Point2<i32> {
        math::midpoint(
            na::Point2::new(self.xyxy[0], self.xyxy[1]),
            na::Point2::new(self.xyxy[2], self.xyxy[3]),
        )
    }

    #[inline]
    pub fn azel(&self) -> (i32, i32) {
        let center = self.center();

        (math::azimuth(center.x), math::elevation(center.y))
    }

    #[inline]
    pub fn hue(&self) -> f32 {
        self.color.hue()
    }

    #[inline]
    pub fn label(&self) -> String {
        K::label(self)
    }

    /// Percent confidence, truncated.
    #[inline]
    pub fn conf(&self) -> i32 {
        (self.confidence * 100.0) as i32
    }

    /// Ordering key: kind ascending, then confidence descending.
    #[inline]
    pub fn sort_key(&self) -> f32 {
        self.kind.id() as f32 - self.confidence
    }

    pub fn record(&self) -> Record {
        let (az, el) = self.azel();

        Record {
            class: self.kind.id(),
            conf: self.conf(),
            color: self.color.hue_bucket(),
            az,
            el,
            xyxy: self.xyxy,
            name: self.kind.name().to_string(),
            label: self.label(),
            slope: self.slope,
        }
    }
}

impl<K: Kind> fmt::Display for Feature<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:3.2}", self.center().x, self.confidence)
    }
}

/// One formatted feature, as written to the output channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Record {
    pub class: i32,
    pub conf: i32,
    pub color: i32,
    pub az: i32,
    pub el: i32,
    pub xyxy: [i32; 4],
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slope: Option<f32>,
}
