use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::prelude::*;

use crate::error::Error;
use crate::feature::Rgb;

/// Full frame size in pixels.
pub const FRAME_SIZE: (u32, u32) = (640, 640);

/// Width of the square edge image line segments are extracted from.
pub const EDGE_WIDTH: u32 = 320;

/// Side of the square window averaged by `center_color`.
pub const COLOR_WINDOW: usize = 14;

/// One captured, pre-processed video frame.
pub trait Frame: Send + Sync {
    /// (width, height) in pixels.
    fn size(&self) -> (u32, u32);

    fn gray(&self) -> ArrayView2<'_, u8>;

    /// One probabilistic line-segment run over the edge image; `(n, 4)`
    /// rows of `x1 y1 x2 y2` in edge-image pixels. Successive calls may
    /// return different segments.
    fn line_segments(&self) -> Result<Array2<f32>, Error>;

    /// Factor from edge-image to full-frame pixels.
    fn edge_scale(&self) -> f32;

    /// Mean color of the window centered on `(cx, cy)`, in frame pixels.
    fn center_color(&self, cx: i32, cy: i32) -> Rgb;
}

/// Source of frames.
pub trait Camera: Send {
    type Frame: Frame + 'static;

    fn capture(&mut self) -> Result<Self::Frame, Error>;
}

/// Mean RGB of the `COLOR_WINDOW` square around `(cx, cy)`, clipped to the
/// image. An empty window is black.
pub fn mean_color(image: ArrayView3<'_, u8>, cx: i32, cy: i32) -> Rgb {
    let (h, w, _) = image.dim();
    let half = (COLOR_WINDOW / 2) as i32;

    let clip = |v: i32, max: usize| v.clamp(0, max as i32) as usize;
    let (y0, y1) = (clip(cy - half, h), clip(cy + half, h));
    let (x0, x1) = (clip(cx - half, w), clip(cx + half, w));

    if y0 >= y1 || x0 >= x1 {
        return Rgb::BLACK;
    }

    let window = image.slice(s![y0..y1, x0..x1, ..3]);
    let count = ((y1 - y0) * (x1 - x0)) as u32;
    let mut sum = [0u32; 3];

    for px in window.rows() {
        for (acc, v) in sum.iter_mut().zip(px.iter()) {
            *acc += *v as u32;
        }
    }

    Rgb::new(
        (sum[0] / count) as u8,
        (sum[1] / count) as u8,
        (sum[2] / count) as u8,
    )
}

/// ITU-R 601 luma of an RGB image.
pub fn to_gray(image: ArrayView3<'_, u8>) -> Array2<u8> {
    let (h, w, _) = image.dim();

    Array2::from_shape_fn((h, w), |(y, x)| {
        let r = image[[y, x, 0]] as u32;
        let g = image[[y, x, 1]] as u32;
        let b = image[[y, x, 2]] as u32;

        ((r * 299 + g * 587 + b * 114) / 1000) as u8
    })
}

/// Frame held in memory, with line-segment runs extracted beforehand.
#[derive(Debug)]
pub struct ImageFrame {
    color: Array3<u8>,
    gray: Array2<u8>,
    runs: Vec<Array2<f32>>,
    next_run: AtomicUsize,
    edge_scale: f32,
}

impl ImageFrame {
    /// `color` is `(height, width, 3)` RGB.
    pub fn new(color: Array3<u8>) -> Self {
        let gray = to_gray(color.view());
        let edge_scale = color.dim().1 as f32 / EDGE_WIDTH as f32;

        Self {
            color,
            gray,
            runs: Vec::new(),
            next_run: AtomicUsize::new(0),
            edge_scale,
        }
    }

    /// Uniformly colored frame.
    pub fn filled(width: usize, height: usize, color: Rgb) -> Self {
        let image = Array3::from_shape_fn((height, width, 3), |(_, _, c)| color.0[c]);

        Self::new(image)
    }

    /// Segment runs handed out in turn by `line_segments`.
    pub fn with_segment_runs(mut self, runs: Vec<Array2<f32>>) -> Self {
        self.runs = runs;
        self
    }

    pub fn with_edge_scale(mut self, edge_scale: f32) -> Self {
        self.edge_scale = edge_scale;
        self
    }

    #[inline]
    pub fn color(&self) -> ArrayView3<'_, u8> {
        self.color.view()
    }
}

impl Clone for ImageFrame {
    fn clone(&self) -> Self {
        Self {
            color: self.color.clone(),
            gray: self.gray.clone(),
            runs: self.runs.clone(),
            next_run: AtomicUsize::new(self.next_run.load(Ordering::Relaxed)),
            edge_scale: self.edge_scale,
        }
    }
}

impl Frame for ImageFrame {
    fn size(&self) -> (u32, u32) {
        let (h, w, _) = self.color.dim();
        (w as u32, h as u32)
    }

    fn gray(&self) -> ArrayView2<'_, u8> {
        self.gray.view()
    }

    fn line_segments(&self) -> Result<Array2<f32>, Error> {
        if self.runs.is_empty() {
            return Ok(Array2::zeros((0, 4)));
        }

        let idx = self.next_run.fetch_add(1, Ordering::Relaxed) % self.runs.len();
        Ok(self.runs[idx].clone())
    }

    fn edge_scale(&self) -> f32 {
        self.edge_scale
    }

    fn center_color(&self, cx: i32, cy: i32) -> Rgb {
        mean_color(self.color.view(), cx, cy)
    }
}

/// Camera of a headless node: every capture fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCamera;

impl Camera for NoCamera {
    type Frame = ImageFrame;

    fn capture(&mut self) -> Result<ImageFrame, Error> {
        Err(Error::NoCamera)
    }
}
