use std::path::Path;
use std::sync::{Mutex, PoisonError};

use ndarray::prelude::*;
use opencv::{
    core::{self, Mat, Vector},
    dnn, imgproc,
    prelude::*,
    videoio,
};
use tracing::{debug, info};

use crate::detection::Detection;
use crate::detector::{DetectorOracle, DetectorRequest, YoloDecoder};
use crate::error::Error;
use crate::feature::Rgb;
use crate::frame::{self, Camera, Frame, EDGE_WIDTH, FRAME_SIZE};

const BLUR_KERNEL: i32 = 4;
const CANNY_LOW: f64 = 30.0;
const CANNY_HIGH: f64 = 100.0;

const HOUGH_RHO: f64 = 2.0;
const HOUGH_THETA: f64 = std::f64::consts::PI / 90.0;
const HOUGH_THRESHOLD: i32 = 15;
const HOUGH_MIN_LENGTH: f64 = 15.0;
const HOUGH_MAX_GAP: f64 = 25.0;

fn mat_to_gray(mat: &Mat) -> Result<Array2<u8>, Error> {
    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    Ok(Array2::from_shape_vec((rows, cols), mat.data_bytes()?.to_vec())?)
}

fn mat_to_rgb(mat: &Mat) -> Result<Array3<u8>, Error> {
    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    Ok(Array3::from_shape_vec((rows, cols, 3), mat.data_bytes()?.to_vec())?)
}

fn gray_to_mat(gray: ArrayView2<'_, u8>) -> Result<Mat, Error> {
    let gray = gray.as_standard_layout();
    let data = gray
        .as_slice()
        .ok_or_else(|| Error::CaptureError("image is not contiguous".into()))?;

    let flat = Mat::from_slice(data)?;
    Ok(flat.reshape(1, gray.nrows() as i32)?.try_clone()?)
}

/// Frame captured through OpenCV: full-size color and gray images plus
/// the edge image line segments are extracted from.
#[derive(Debug, Clone)]
pub struct CvFrame {
    color: Array3<u8>,
    gray: Array2<u8>,
    edges: Array2<u8>,
}

impl CvFrame {
    /// `bgr` is a camera image of any size.
    pub fn from_bgr(bgr: &Mat) -> Result<Self, Error> {
        let size = core::Size::new(FRAME_SIZE.0 as i32, FRAME_SIZE.1 as i32);
        let mut resized = Mat::default();
        imgproc::resize(bgr, &mut resized, size, 0.0, 0.0, imgproc::INTER_LINEAR)?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

        let mut gray = Mat::default();
        imgproc::cvt_color(&resized, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;

        let edge_size = core::Size::new(EDGE_WIDTH as i32, EDGE_WIDTH as i32);
        let mut small = Mat::default();
        imgproc::resize(&gray, &mut small, edge_size, 0.0, 0.0, imgproc::INTER_AREA)?;

        let mut blurred = Mat::default();
        imgproc::blur(
            &small,
            &mut blurred,
            core::Size::new(BLUR_KERNEL, BLUR_KERNEL),
            core::Point::new(-1, -1),
            core::BORDER_DEFAULT,
        )?;

        let mut edges = Mat::default();
        imgproc::canny(&blurred, &mut edges, CANNY_LOW, CANNY_HIGH, 3, false)?;

        Ok(Self {
            color: mat_to_rgb(&rgb)?,
            gray: mat_to_gray(&gray)?,
            edges: mat_to_gray(&edges)?,
        })
    }
}

impl Frame for CvFrame {
    fn size(&self) -> (u32, u32) {
        let (h, w, _) = self.color.dim();
        (w as u32, h as u32)
    }

    fn gray(&self) -> ArrayView2<'_, u8> {
        self.gray.view()
    }

    fn line_segments(&self) -> Result<Array2<f32>, Error> {
        let edges = gray_to_mat(self.edges.view())?;
        let mut lines = Vector::<core::Vec4i>::new();

        imgproc::hough_lines_p(
            &edges,
            &mut lines,
            HOUGH_RHO,
            HOUGH_THETA,
            HOUGH_THRESHOLD,
            HOUGH_MIN_LENGTH,
            HOUGH_MAX_GAP,
        )?;

        let mut out = Array2::zeros((lines.len(), 4));
        for (mut row, line) in out.outer_iter_mut().zip(lines.iter()) {
            for (dst, v) in row.iter_mut().zip(line.0.iter()) {
                *dst = *v as f32;
            }
        }

        Ok(out)
    }

    fn edge_scale(&self) -> f32 {
        self.color.dim().1 as f32 / self.edges.ncols().max(1) as f32
    }

    fn center_color(&self, cx: i32, cy: i32) -> Rgb {
        frame::mean_color(self.color.view(), cx, cy)
    }
}

/// Video device read through `opencv::videoio`.
pub struct CvCamera {
    cap: videoio::VideoCapture,
}

impl CvCamera {
    pub fn open(index: i32) -> Result<Self, Error> {
        let cap = videoio::VideoCapture::new(index, videoio::CAP_ANY)?;
        if !videoio::VideoCapture::is_opened(&cap)? {
            return Err(Error::CaptureError(format!("cannot open camera {}", index)));
        }

        info!("camera {} opened", index);
        Ok(Self { cap })
    }
}

impl Camera for CvCamera {
    type Frame = CvFrame;

    fn capture(&mut self) -> Result<CvFrame, Error> {
        let mut mat = Mat::default();

        if !self.cap.read(&mut mat)? || mat.empty() {
            return Err(Error::CaptureError("no frame".into()));
        }

        CvFrame::from_bgr(&mat)
    }
}

/// YOLO network run through `opencv::dnn`.
pub struct CvYolo {
    net: Mutex<dnn::Net>,
    decoder: YoloDecoder,
}

impl CvYolo {
    pub fn load<P: AsRef<Path>>(model: P, decoder: YoloDecoder) -> Result<Self, Error> {
        let path = model.as_ref().to_string_lossy();
        let net = dnn::read_net_from_onnx(&path)?;
        info!("loaded model {}", path);

        Ok(Self {
            net: Mutex::new(net),
            decoder,
        })
    }
}

impl DetectorOracle for CvYolo {
    fn detect(
        &self,
        gray: ArrayView2<'_, u8>,
        request: &DetectorRequest,
    ) -> Result<Vec<Detection>, Error> {
        let (h, w) = gray.dim();
        let mut image = Mat::default();
        imgproc::cvt_color(&gray_to_mat(gray)?, &mut image, imgproc::COLOR_GRAY2BGR, 0)?;

        let side = request.input_size as i32;
        let blob = dnn::blob_from_image(
            &image,
            1.0 / 255.0,
            core::Size::new(side, side),
            core::Scalar::default(),
            true,
            false,
            core::CV_32F,
        )?;

        let out = {
            let mut net = self.net.lock().unwrap_or_else(PoisonError::into_inner);
            net.set_input(&blob, "", 1.0, core::Scalar::default())?;
            net.forward_single("")?
        };

        let dims: Vec<usize> = out.mat_size().iter().map(|&d| d as usize).collect();
        if dims.len() != 3 {
            return Err(Error::DetectorError(format!("unexpected output shape {:?}", dims)));
        }

        let raw = ArrayView3::from_shape((dims[0], dims[1], dims[2]), out.data_typed::<f32>()?)?;

        // (batch, attributes, predictions) layouts put the long axis last
        let preds = if dims[1] < dims[2] {
            raw.permuted_axes([0, 2, 1])
        } else {
            raw
        };
        debug!("network output {:?}", preds.shape());

        let mut batches = self.decoder.decode(
            preds,
            (request.input_size as usize, request.input_size as usize),
            (w as u32, h as u32),
            request,
        )?;

        Ok(batches.pop().unwrap_or_default())
    }
}
