use camtrack::{ImageFrame, Kind, LaneDetector, LaneKind, LaneList, Rgb};
use ndarray::{array, Array2};

const FLOOR: Rgb = Rgb([128, 128, 128]);

/// Diagonal edge-image segment starting at `(x, 100)`.
fn diagonal(x: f32) -> [f32; 4] {
    [x, 100.0, x + 40.0, 140.0]
}

fn run(segments: &[[f32; 4]]) -> Array2<f32> {
    let flat: Vec<f32> = segments.iter().flatten().copied().collect();
    Array2::from_shape_vec((segments.len(), 4), flat).unwrap()
}

#[test]
fn two_boundaries_make_one_lane() {
    let clutter = [60.0, 20.0, 60.0, 120.0];
    let frame = ImageFrame::filled(640, 640, FLOOR)
        .with_segment_runs(vec![run(&[diagonal(100.0), diagonal(150.0), clutter])]);
    let detector = LaneDetector::default();
    let mut lanes = LaneList::new();

    lanes.refresh(&detector, &frame);
    lanes.update_targets();

    assert_eq!(lanes.len(), 1);
    let lane = &lanes.features()[0];
    assert_eq!(lane.kind, LaneKind::Center);
    assert_eq!(lane.xyxy, [240, 240, 340, 240]);
    assert_eq!(lane.confidence, 0.5);
    assert_eq!(lane.slope, Some(0.0));
    assert!(lane.target);

    assert_eq!(lanes.event(), vec![-94, 684, 0]);
    assert_eq!(LaneKind::label(lane), "-94");

    let records = lanes.format();
    assert_eq!(records[0].name, "Center");
    assert_eq!(records[0].conf, 50);
    assert_eq!(records[0].slope, Some(0.0));
}

#[test]
fn history_carries_lanes_through_empty_frames() {
    let seen = ImageFrame::filled(640, 640, FLOOR)
        .with_segment_runs(vec![run(&[diagonal(100.0), diagonal(150.0)])]);
    let blank = ImageFrame::filled(640, 640, FLOOR);
    let detector = LaneDetector::default();
    let mut lanes = LaneList::new();

    lanes.refresh(&detector, &seen);
    assert_eq!(lanes.len(), 1);

    // the sighting stays in the history for five more cycles
    for _ in 0..5 {
        lanes.refresh(&detector, &blank);
        assert_eq!(lanes.len(), 1);
        assert_eq!(lanes.features()[0].ttl, LaneKind::TTL);
    }

    lanes.refresh(&detector, &blank);
    assert_eq!(lanes.features()[0].ttl, LaneKind::TTL - 1);
    assert_eq!(detector.history_len(), 6);

    for _ in 0..3 {
        lanes.refresh(&detector, &blank);
    }
    assert!(lanes.is_empty());
}

#[test]
fn at_most_two_lanes_and_one_target() {
    let boundaries: Vec<_> = [30.0, 80.0, 130.0, 180.0, 230.0]
        .iter()
        .map(|&x| diagonal(x))
        .collect();
    let frame = ImageFrame::filled(640, 640, FLOOR).with_segment_runs(vec![run(&boundaries)]);
    let mut lanes = LaneList::new();

    lanes.refresh(&LaneDetector::default(), &frame);
    lanes.update_targets();

    assert_eq!(lanes.len(), 2);
    assert_eq!(lanes.targets().count(), 1);
}

#[test]
fn colored_floor_hides_lanes() {
    let frame = ImageFrame::filled(640, 640, Rgb::new(40, 40, 220))
        .with_segment_runs(vec![run(&[diagonal(100.0), diagonal(150.0)])]);
    let mut lanes = LaneList::new();

    lanes.refresh(&LaneDetector::default(), &frame);

    assert!(lanes.is_empty());
    assert_eq!(lanes.event(), vec![0, 0, 0]);
}

#[test]
fn malformed_segments_count_as_no_detection() {
    let frame = ImageFrame::filled(640, 640, FLOOR).with_segment_runs(vec![array![[1.0, 2.0]]]);
    let mut lanes = LaneList::new();

    lanes.refresh(&LaneDetector::default(), &frame);
    assert!(lanes.is_empty());
}
