use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb, Xywh};
use crate::math;

/// Smallest accepted box side, in pixels.
pub const MIN_SIDE: f32 = 20.0;

/// Largest accepted deviation of the box diagonal from 45 degrees, in radians.
pub const MAX_DIAGONAL_DEVIATION: f32 = 0.15;

/// One raw detector answer: (x,y) of the center and (width,height) of bbox
/// in full-frame pixels, plus the raw class id of the network.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: i32,
}

impl Detection {
    pub fn from_ltrb(bbox: BBox<Ltrb>, confidence: f32, class: i32) -> Self {
        let c = bbox.as_xywh();

        Self {
            x: c.cx(),
            y: c.cy(),
            w: c.width(),
            h: c.height(),
            confidence,
            class,
        }
    }

    #[inline(always)]
    pub fn bbox(&self) -> BBox<Xywh> {
        BBox::xywh(self.x, self.y, self.w, self.h)
    }

    #[inline(always)]
    pub fn ltrb(&self) -> BBox<Ltrb> {
        self.bbox().as_ltrb()
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.ltrb().iou(&other.ltrb())
    }

    /// Boxes are expected to be near-square markers; elongated, tiny or
    /// non-finite boxes are noise.
    pub fn is_plausible(&self) -> bool {
        [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite())
            && self.w.abs() >= MIN_SIDE
            && self.h.abs() >= MIN_SIDE
            && math::diagonal_deviation(self.w, self.h) <= MAX_DIAGONAL_DEVIATION
    }
}
