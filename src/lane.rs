use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use nalgebra as na;
use ndarray::prelude::*;
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::circular_queue::CircularQueue;
use crate::error::Error;
use crate::feature::{Feature, Kind};
use crate::frame::{Frame, FRAME_SIZE};
use crate::math;
use crate::track_list::{Detect, TrackList};

pub const HOUGH_ITERATIONS: usize = 8;
pub const HISTORY_DEPTH: usize = 6;
pub const BINS: usize = 12;

/// Segments with a normalized slope at or below this are dropped.
pub const MIN_SEGMENT_SLOPE: f32 = 0.3;

/// Largest horizontal distance between the two boundaries of a lane.
pub const MAX_PAIR_SEPARATION: i32 = 150;

/// Largest hue, in degrees, of the surface between two boundaries.
/// Hue is compared in degrees rather than on the unit interval, so green or
/// blue floors hide every lane.
pub const MAX_FLOOR_HUE: f32 = 100.0;

/// Largest angle, in radians, of the line joining two boundary midpoints.
pub const MAX_PAIR_ANGLE: f32 = 0.78;

pub const MAX_LANES: usize = 2;
pub const LANE_CONFIDENCE: f32 = 0.5;

// columns of an analyzed segment batch
pub const X1: usize = 0;
pub const Y1: usize = 1;
pub const X2: usize = 2;
pub const Y2: usize = 3;
pub const MIDX: usize = 4;
pub const MIDY: usize = 5;
pub const SLOPE: usize = 6;
pub const COLUMNS: usize = 7;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LaneKind {
    Center = 0,
    Other = 9,
}

impl Kind for LaneKind {
    const TRACKED: &'static [Self] = &[LaneKind::Center];
    const OTHER: Self = LaneKind::Other;
    const TTL: u32 = 3;
    const EVENT_WIDTH: usize = 3;

    #[inline]
    fn id(self) -> i32 {
        self as i32
    }

    fn name(self) -> &'static str {
        match self {
            LaneKind::Center => "Center",
            LaneKind::Other => "Other",
        }
    }

    fn label(feature: &Feature<Self>) -> String {
        feature.azel().0.to_string()
    }

    fn event_values(feature: &Feature<Self>) -> Vec<i32> {
        let (az, el) = feature.azel();
        let slope = feature.slope.unwrap_or(0.0);

        vec![az, el, (slope * 100.0) as i32]
    }
}

/// Lane track list.
pub type LaneList<S = crate::track_list::CenterHue> = TrackList<LaneKind, S>;

/// Adds midpoint and normalized slope columns to `x1 y1 x2 y2` rows and
/// sorts the result by midpoint x.
pub fn analyze(lines: ArrayView2<'_, f32>) -> Result<Array2<f32>, Error> {
    if lines.ncols() < 4 {
        return Err(Error::CaptureError(format!(
            "line segments need 4 columns, got {}",
            lines.ncols()
        )));
    }

    let mut rows: Vec<[f32; COLUMNS]> = lines
        .outer_iter()
        .map(|l| {
            let (x1, y1, x2, y2) = (l[X1], l[Y1], l[X2], l[Y2]);

            [
                x1,
                y1,
                x2,
                y2,
                (x1 + x2) / 2.0,
                (y1 + y2) / 2.0,
                math::normalized_slope(x2 - x1, y2 - y1),
            ]
        })
        .collect();

    rows.sort_by(|a, b| a[MIDX].total_cmp(&b[MIDX]));

    let n = rows.len();
    Ok(Array2::from_shape_vec((n, COLUMNS), rows.concat())?)
}

/// `count` equal-width bin left edges spanning `width`.
pub fn bin_edges(width: f32, count: usize) -> Vec<f32> {
    let step = width / count as f32;
    (0..count).map(|i| step * i as f32).collect()
}

/// Averages every column of the segments falling in each populated bin of
/// midpoint x. Bin `i` holds `edges[i - 1] <= midx < edges[i]`; rows come
/// out in bin order.
pub fn consensus(segments: ArrayView2<'_, f32>, edges: &[f32]) -> Array2<f32> {
    let mut bins: BTreeMap<usize, (f32, [f32; COLUMNS])> = BTreeMap::new();

    for seg in segments.outer_iter() {
        let bin = edges.iter().take_while(|&&e| e <= seg[MIDX]).count();
        let (count, sum) = bins.entry(bin).or_insert((0.0, [0.0; COLUMNS]));

        *count += 1.0;
        for (acc, v) in sum.iter_mut().zip(seg.iter()) {
            *acc += *v;
        }
    }

    let mut out = Array2::zeros((bins.len(), COLUMNS));
    for (mut row, (count, sum)) in out.outer_iter_mut().zip(bins.into_values()) {
        for (dst, v) in row.iter_mut().zip(sum.iter()) {
            *dst = *v / count;
        }
    }

    out
}

/// A lane between two consensus boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneCandidate {
    pub center: na::Point2<i32>,
    pub left: na::Point2<i32>,
    pub right: na::Point2<i32>,

    /// Angle of the line joining the two boundary midpoints.
    pub angle: f32,
}

impl LaneCandidate {
    pub fn into_feature(self) -> Feature<LaneKind> {
        Feature::new(
            LaneKind::Center,
            [self.left.x, self.left.y, self.right.x, self.right.y],
        )
        .with_confidence(LANE_CONFIDENCE)
        .with_slope(self.angle)
    }
}

/// Pairs up consensus lines into lanes and keeps the `MAX_LANES`
/// straightest ones. `consensus` rows are expected sorted by midpoint x.
pub fn choose_best_lane<F: Frame + ?Sized>(
    consensus: ArrayView2<'_, f32>,
    frame: &F,
) -> Vec<LaneCandidate> {
    let mids: Vec<na::Point2<i32>> = consensus
        .outer_iter()
        .map(|l| na::Point2::new(l[MIDX] as i32, l[MIDY] as i32))
        .collect();

    let mut candidates = Vec::new();

    for (i, &a) in mids.iter().enumerate() {
        for &b in &mids[i + 1..] {
            if (a.x - b.x).abs() >= MAX_PAIR_SEPARATION {
                continue;
            }

            let center = math::midpoint(a, b);
            let hue = frame.center_color(center.x, center.y).hue() * 360.0;
            if hue >= MAX_FLOOR_HUE {
                continue;
            }

            let angle = ((b.y - a.y) as f32).atan2((b.x - a.x) as f32);
            if angle.abs() >= MAX_PAIR_ANGLE {
                continue;
            }

            candidates.push(LaneCandidate {
                center,
                left: a,
                right: b,
                angle,
            });
        }
    }

    debug!("{} lane candidates", candidates.len());

    candidates.sort_by(|a, b| a.angle.abs().total_cmp(&b.angle.abs()));
    candidates.truncate(MAX_LANES);
    candidates
}

/// Reconstructs lanes from repeated line-segment runs smoothed over the
/// last few cycles.
#[derive(Debug)]
pub struct LaneDetector {
    history: Mutex<CircularQueue<Array2<f32>>>,
    edges: Vec<f32>,
    iterations: usize,
}

impl Default for LaneDetector {
    fn default() -> Self {
        Self::new(FRAME_SIZE.0)
    }
}

impl LaneDetector {
    pub fn new(frame_width: u32) -> Self {
        Self {
            history: Mutex::new(CircularQueue::with_capacity(HISTORY_DEPTH)),
            edges: bin_edges(frame_width as f32, BINS),
            iterations: HOUGH_ITERATIONS,
        }
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history = Mutex::new(CircularQueue::with_capacity(depth));
        self
    }

    pub fn with_bins(mut self, frame_width: u32, bins: usize) -> Self {
        self.edges = bin_edges(frame_width as f32, bins.max(1));
        self
    }

    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Pushes this cycle's segments into the history and returns the
    /// consensus lines over the whole history window.
    pub fn add_lines(&self, lines: ArrayView2<'_, f32>) -> Result<Array2<f32>, Error> {
        let current = analyze(lines)?;

        let concat = {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push(current.slice(s![.., ..4]).to_owned());

            let views: Vec<_> = history.iter().map(|batch| batch.view()).collect();
            ndarray::concatenate(Axis(0), &views)?
        };

        let analyzed = analyze(concat.view())?;
        let kept: Vec<usize> = analyzed
            .outer_iter()
            .enumerate()
            .filter(|(_, row)| row[SLOPE].abs() > MIN_SEGMENT_SLOPE)
            .map(|(idx, _)| idx)
            .collect();

        let selected = analyzed.select(Axis(0), &kept);
        Ok(consensus(selected.view(), &self.edges))
    }
}

impl<F: Frame + ?Sized> Detect<LaneKind, F> for LaneDetector {
    fn detect(&self, frame: &F) -> Result<Vec<Feature<LaneKind>>, Error> {
        let scale = frame.edge_scale();
        let mut runs = Vec::with_capacity(self.iterations);

        for _ in 0..self.iterations {
            let mut run = frame.line_segments()?;
            run.mapv_inplace(|v| v * scale);
            runs.push(run);
        }

        let views: Vec<_> = runs.iter().map(|run| run.view()).collect();
        let sample = ndarray::concatenate(Axis(0), &views)?;

        let combo = self.add_lines(sample.view())?;
        debug!("combo lines {}", combo.nrows());

        let best = choose_best_lane(combo.view(), frame);
        info!("best lanes {:?}", best);

        Ok(best.into_iter().map(LaneCandidate::into_feature).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Rgb;
    use crate::frame::ImageFrame;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    fn consensus_lines(mids: &[(f32, f32)]) -> Array2<f32> {
        let mut out = Array2::zeros((mids.len(), COLUMNS));
        for (mut row, &(x, y)) in out.outer_iter_mut().zip(mids) {
            row[MIDX] = x;
            row[MIDY] = y;
        }
        out
    }

    #[test]
    fn analyze_adds_midpoints_and_sorts() {
        let lines = array![[300.0, 0.0, 300.0, 100.0], [0.0, 50.0, 100.0, 50.0]];
        let out = analyze(lines.view()).unwrap();

        assert_eq!(out.dim(), (2, COLUMNS));
        assert_eq!(out[[0, MIDX]], 50.0);
        assert_eq!(out[[0, MIDY]], 50.0);
        assert_abs_diff_eq!(out[[0, SLOPE]], 1.0, epsilon = 1e-6);
        assert_eq!(out[[1, MIDX]], 300.0);
        assert_abs_diff_eq!(out[[1, SLOPE]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn consensus_averages_per_bin() {
        let edges = bin_edges(640.0, BINS);
        let mut segs = Array2::zeros((3, COLUMNS));
        segs[[0, MIDX]] = 10.0;
        segs[[0, X1]] = 2.0;
        segs[[1, MIDX]] = 20.0;
        segs[[1, X1]] = 4.0;
        segs[[2, MIDX]] = 100.0;

        let out = consensus(segs.view(), &edges);

        assert_eq!(out.nrows(), 2);
        assert_eq!(out[[0, MIDX]], 15.0);
        assert_eq!(out[[0, X1]], 3.0);
        assert_eq!(out[[1, MIDX]], 100.0);
    }

    #[test]
    fn history_is_bounded() {
        let detector = LaneDetector::default();
        let lines = array![[0.0, 0.0, 40.0, 40.0]];

        for _ in 0..10 {
            detector.add_lines(lines.view()).unwrap();
        }

        assert_eq!(detector.history_len(), HISTORY_DEPTH);
    }

    #[test]
    fn concurrent_add_lines_share_one_history() {
        const THREADS: usize = 8;
        const CALLS: usize = 5;

        let detector = Arc::new(LaneDetector::default());
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let detector = Arc::clone(&detector);
                std::thread::spawn(move || {
                    let lines = array![[200.0, 0.0, 300.0, 100.0]];
                    (0..CALLS)
                        .map(|_| detector.add_lines(lines.view()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for worker in workers {
            for out in worker.join().unwrap() {
                assert_eq!(out.ncols(), COLUMNS);
                assert_eq!(out.nrows(), 1);
                assert_eq!(out[[0, MIDX]], 250.0);
                assert_eq!(out[[0, MIDY]], 50.0);
            }
        }

        assert_eq!(detector.history_len(), (THREADS * CALLS).min(HISTORY_DEPTH));
    }

    #[test]
    fn add_lines_drops_low_slope_segments() {
        let detector = LaneDetector::default();
        let lines = array![[100.0, 0.0, 100.0, 100.0], [200.0, 0.0, 300.0, 100.0]];

        let out = detector.add_lines(lines.view()).unwrap();

        assert_eq!(out.nrows(), 1);
        assert_eq!(out[[0, MIDX]], 250.0);
    }

    #[test]
    fn best_lanes_are_the_two_straightest() {
        let lines = consensus_lines(&[(100.0, 300.0), (150.0, 310.0), (200.0, 330.0), (260.0, 300.0)]);
        let frame = ImageFrame::filled(640, 640, Rgb::new(128, 128, 128));

        let best = choose_best_lane(lines.view(), &frame);

        assert_eq!(best.len(), 2);
        assert_eq!(best[0].center, na::Point2::new(205, 305));
        assert_abs_diff_eq!(best[0].angle, (-10.0f32).atan2(110.0), epsilon = 1e-6);
        assert_eq!(best[1].center, na::Point2::new(125, 305));
        assert_abs_diff_eq!(best[1].angle, 10.0f32.atan2(50.0), epsilon = 1e-6);
    }

    #[test]
    fn colored_background_rejects_pairs() {
        let lines = consensus_lines(&[(100.0, 300.0), (150.0, 310.0)]);
        let frame = ImageFrame::filled(640, 640, Rgb::new(0, 0, 255));

        assert!(choose_best_lane(lines.view(), &frame).is_empty());
    }

    #[test]
    fn floor_hue_gate_is_in_degrees() {
        let lines = consensus_lines(&[(100.0, 300.0), (150.0, 310.0)]);
        let green = ImageFrame::filled(640, 640, Rgb::new(0, 200, 0));
        let orange = ImageFrame::filled(640, 640, Rgb::new(220, 120, 40));

        assert!(choose_best_lane(lines.view(), &green).is_empty());
        assert_eq!(choose_best_lane(lines.view(), &orange).len(), 1);
    }

    #[test]
    fn lane_event_and_label() {
        let lane = LaneCandidate {
            center: na::Point2::new(250, 300),
            left: na::Point2::new(200, 300),
            right: na::Point2::new(300, 300),
            angle: 0.257,
        }
        .into_feature();

        assert_eq!(lane.ttl, 3);
        assert_eq!(lane.label(), "-219");
        assert_eq!(LaneKind::event_values(&lane), vec![-219, 570, 25]);
    }
}
