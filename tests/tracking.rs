use std::collections::VecDeque;
use std::sync::Mutex;

use camtrack::bbox::BBox;
use camtrack::math::{azimuth, elevation};
use camtrack::{
    Detection, DetectorOracle, DetectorRequest, Error, ImageFrame, ObjectDetector, Rgb,
    ThingKind, ThingList,
};
use ndarray::ArrayView2;

/// Oracle answering from a script, one batch per call, then nothing.
struct Scripted(Mutex<VecDeque<Vec<Detection>>>);

impl Scripted {
    fn new(batches: Vec<Vec<Detection>>) -> Self {
        Self(Mutex::new(batches.into()))
    }
}

impl DetectorOracle for Scripted {
    fn detect(&self, _: ArrayView2<'_, u8>, _: &DetectorRequest) -> Result<Vec<Detection>, Error> {
        Ok(self.0.lock().unwrap().pop_front().unwrap_or_default())
    }
}

fn boxed(cx: f32, cy: f32, side: f32, confidence: f32, class: i32) -> Detection {
    let half = side / 2.0;
    Detection::from_ltrb(
        BBox::ltrb(cx - half, cy - half, cx + half, cy + half),
        confidence,
        class,
    )
}

fn targets_per_kind(list: &ThingList) -> Vec<usize> {
    [ThingKind::Ball, ThingKind::Cube, ThingKind::Star]
        .iter()
        .map(|&kind| list.targets().filter(|f| f.kind == kind).count())
        .collect()
}

#[test]
fn ball_is_followed_then_forgotten() {
    let frame = ImageFrame::filled(640, 640, Rgb::new(200, 40, 40));
    let detector = ObjectDetector::new(
        Scripted::new(vec![
            vec![boxed(320.0, 400.0, 40.0, 0.8, 0)],
            vec![boxed(324.0, 402.0, 40.0, 0.7, 0)],
        ]),
        DetectorRequest::default(),
    );
    let mut list = ThingList::new();

    // first sighting becomes the target
    list.refresh(&detector, &frame);
    list.update_targets();
    assert_eq!(list.len(), 1);
    assert!(list.target(ThingKind::Ball).is_some());

    // a nearby sighting replaces it with a fresh lifetime
    list.refresh(&detector, &frame);
    list.update_targets();
    assert_eq!(list.len(), 1);
    let ball = &list.features()[0];
    assert_eq!(ball.ttl, 2);
    assert_eq!(ball.center().x, 324);
    assert!(ball.target);

    // nothing seen: aged for two cycles, dropped on the third
    for expected in [1, 1, 0] {
        list.refresh(&detector, &frame);
        list.update_targets();
        assert_eq!(list.len(), expected);
    }
    assert_eq!(list.event(), vec![0; 12]);
}

#[test]
fn at_most_one_target_per_kind() {
    let frame = ImageFrame::filled(640, 640, Rgb::new(40, 200, 40));
    let detector = ObjectDetector::new(
        Scripted::new(vec![
            vec![
                boxed(100.0, 400.0, 40.0, 0.7, 0),
                boxed(300.0, 400.0, 40.0, 0.9, 0),
                boxed(500.0, 400.0, 40.0, 0.65, 1),
            ],
            vec![
                boxed(100.0, 400.0, 40.0, 0.95, 0),
                boxed(300.0, 200.0, 40.0, 0.99, 1),
            ],
        ]),
        DetectorRequest::default(),
    );
    let mut list = ThingList::new();

    list.refresh(&detector, &frame);
    list.update_targets();
    assert_eq!(targets_per_kind(&list), vec![1, 1, 0]);
    assert_eq!(list.target(ThingKind::Ball).unwrap().center().x, 300);

    // the old ball target survives unmatched and keeps its flag
    list.refresh(&detector, &frame);
    list.update_targets();
    assert_eq!(targets_per_kind(&list), vec![1, 1, 0]);
    assert_eq!(list.target(ThingKind::Ball).unwrap().center().x, 300);
    assert_eq!(list.target(ThingKind::Cube).unwrap().center().x, 500);
}

#[test]
fn records_reproduce_azimuth_and_elevation() {
    let frame = ImageFrame::filled(640, 640, Rgb::new(40, 40, 200));
    let detector = ObjectDetector::new(
        Scripted::new(vec![vec![
            boxed(101.0, 333.0, 30.0, 0.9, 2),
            boxed(455.0, 610.0, 50.0, 0.75, 1),
        ]]),
        DetectorRequest::default(),
    );
    let mut list = ThingList::new();

    list.refresh(&detector, &frame);
    let records = list.format();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "Cube");
    assert_eq!(records[1].name, "Star");

    for record in &records {
        let [x1, y1, x2, y2] = record.xyxy;
        assert!(y1 > y2, "vertical axis is flipped");
        assert_eq!(record.az, azimuth((x1 + x2) / 2));
        assert_eq!(record.el, elevation((y1 + y2) / 2));
    }

    let json = serde_json::to_value(&records).unwrap();
    assert_eq!(json[1]["label"], "Star 0.90");
    assert!(json[1].get("slope").is_none());
}

#[test]
fn event_vector_has_fixed_width() {
    let frame = ImageFrame::filled(640, 640, Rgb::new(128, 128, 128));
    let detector = ObjectDetector::new(
        Scripted::new(vec![vec![boxed(320.0, 400.0, 40.0, 0.6, 2)]]),
        DetectorRequest::default(),
    );
    let mut list = ThingList::new();

    list.refresh(&detector, &frame);
    list.update_targets();

    let event = list.event();
    assert_eq!(event.len(), 12);
    assert_eq!(&event[..8], &[0; 8]);
    assert_eq!(&event[8..], &[60, 0, 0, 380]);
}
