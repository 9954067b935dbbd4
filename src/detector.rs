use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bbox::BBox;
use crate::detection::Detection;
use crate::error::Error;

use ndarray::prelude::*;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// Static parameters handed to the detector on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorRequest {
    /// Square network input size, in pixels.
    pub input_size: u32,

    /// Raw class ids to keep; empty keeps every class.
    pub classes: Vec<i32>,
    pub min_confidence: f32,
    pub max_detections: usize,
}

impl Default for DetectorRequest {
    fn default() -> Self {
        Self {
            input_size: 640,
            classes: vec![0, 1, 2],
            min_confidence: 0.6,
            max_detections: 6,
        }
    }
}

impl DetectorRequest {
    #[inline]
    pub fn allows(&self, class: i32) -> bool {
        self.classes.is_empty() || self.classes.contains(&class)
    }
}

/// External object detector. May be slow; it is never called twice at
/// the same time for one track list.
pub trait DetectorOracle: Send + Sync {
    fn detect(
        &self,
        gray: ArrayView2<'_, u8>,
        request: &DetectorRequest,
    ) -> Result<Vec<Detection>, Error>;
}

impl<T: DetectorOracle + ?Sized> DetectorOracle for Arc<T> {
    fn detect(
        &self,
        gray: ArrayView2<'_, u8>,
        request: &DetectorRequest,
    ) -> Result<Vec<Detection>, Error> {
        (**self).detect(gray, request)
    }
}

impl<T: DetectorOracle + ?Sized> DetectorOracle for Box<T> {
    fn detect(
        &self,
        gray: ArrayView2<'_, u8>,
        request: &DetectorRequest,
    ) -> Result<Vec<Detection>, Error> {
        (**self).detect(gray, request)
    }
}

/// Detector used when no model is available: never sees anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDetector;

impl DetectorOracle for NoDetector {
    fn detect(&self, _: ArrayView2<'_, u8>, _: &DetectorRequest) -> Result<Vec<Detection>, Error> {
        Ok(Vec::new())
    }
}

/// Turns raw YOLO output rows `(center_x, center_y, width, height,
/// class scores...)`, expressed in network input pixels, into detections
/// in frame pixels.
#[derive(Debug, Clone)]
pub struct YoloDecoder {
    pub iou_threshold: f32,
}

impl Default for YoloDecoder {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl YoloDecoder {
    pub fn new(iou_threshold: f32) -> Self {
        Self { iou_threshold }
    }

    /// `view` is `(batch, predictions, 4 + classes)`.
    pub fn decode(
        &self,
        view: ArrayView3<'_, f32>,
        in_size: (usize, usize),
        frame_size: (u32, u32),
        request: &DetectorRequest,
    ) -> Result<Vec<Vec<Detection>>, Error> {
        let shape = view.shape();
        let nbatches = shape[0];
        let pred_size = shape[2];

        if pred_size < 5 {
            return Err(Error::DetectorError(format!(
                "prediction rows too short: {}",
                pred_size
            )));
        }

        let (in_w, in_h) = in_size;
        let sx = frame_size.0 as f32 / in_w as f32;
        let sy = frame_size.1 as f32 / in_h as f32;
        let mut results = Vec::with_capacity(nbatches);

        for batch in view.outer_iter() {
            // The bounding boxes grouped by (maximum) class index.
            let mut bboxes: BTreeMap<i32, Vec<Detection>> = BTreeMap::new();

            for row in batch.outer_iter() {
                let classes = row.slice(s![4..]);

                let mut class_index = -1;
                let mut confidence = 0.0;

                for (idx, val) in classes.iter().copied().enumerate() {
                    if val > confidence {
                        class_index = idx as i32;
                        confidence = val;
                    }
                }

                if class_index < 0
                    || confidence < request.min_confidence
                    || !request.allows(class_index)
                {
                    continue;
                }

                let bbox = BBox::xywh(row[0] * sx, row[1] * sy, row[2] * sx, row[3] * sy);

                bboxes.entry(class_index).or_default().push(Detection {
                    x: bbox.cx(),
                    y: bbox.cy(),
                    w: bbox.width(),
                    h: bbox.height(),
                    confidence,
                    class: class_index,
                });
            }

            let mut kept = Vec::new();
            for (_, mut dets) in bboxes {
                let indices = self.non_maximum_supression(&mut dets);
                kept.extend(indices.into_iter().map(|idx| dets[idx]));
            }

            kept.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
            kept.truncate(request.max_detections);
            results.push(kept);
        }

        Ok(results)
    }

    fn non_maximum_supression(&self, dets: &mut [Detection]) -> Vec<usize> {
        dets.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut retain = vec![true; dets.len()];
        for idx in 0..dets.len() {
            if !retain[idx] {
                continue;
            }

            for other in idx + 1..dets.len() {
                if retain[other] && dets[idx].iou(&dets[other]) > self.iou_threshold {
                    retain[other] = false;
                }
            }
        }

        retain
            .into_iter()
            .enumerate()
            .filter_map(|(idx, keep)| keep.then_some(idx))
            .collect()
    }
}
