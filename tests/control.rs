use std::sync::{Arc, Mutex};
use std::time::Duration;

use camtrack::bbox::BBox;
use camtrack::{
    Camera, Control, Detection, DetectorOracle, DetectorRequest, Error, ImageFrame, LaneDetector,
    Node, ObjectDetector, Record, Remote, Rgb, Robot, TopicSink,
};
use ndarray::{array, ArrayView2};
use tokio::sync::watch;
use tokio::time::timeout;

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<(String, Vec<i32>)>>>);

impl Recorder {
    fn events(&self, name: &str) -> Vec<Vec<i32>> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl Node for Recorder {
    fn register_events(&mut self, _: &[(&str, usize)]) -> Result<(), Error> {
        Ok(())
    }

    fn send_event(&mut self, name: &str, values: &[i32]) -> Result<(), Error> {
        self.0.lock().unwrap().push((name.to_string(), values.to_vec()));
        Ok(())
    }

    fn set_variable(&mut self, _: &str, _: &[i32]) -> Result<(), Error> {
        Ok(())
    }

    fn load_program(&mut self, _: &str) -> Result<(), Error> {
        Ok(())
    }

    fn run(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

struct StillCamera(ImageFrame);

impl Camera for StillCamera {
    type Frame = ImageFrame;

    fn capture(&mut self) -> Result<ImageFrame, Error> {
        Ok(self.0.clone())
    }
}

struct CubeAhead;

impl DetectorOracle for CubeAhead {
    fn detect(&self, _: ArrayView2<'_, u8>, _: &DetectorRequest) -> Result<Vec<Detection>, Error> {
        Ok(vec![Detection::from_ltrb(
            BBox::ltrb(300.0, 380.0, 340.0, 420.0),
            0.9,
            1,
        )])
    }
}

fn scene() -> ImageFrame {
    let segments = array![[100.0, 100.0, 140.0, 140.0], [150.0, 100.0, 190.0, 140.0]];
    ImageFrame::filled(640, 640, Rgb::new(128, 128, 128)).with_segment_runs(vec![segments])
}

#[tokio::test]
async fn control_loop_publishes_and_signals_robot() {
    let sink = TopicSink::default();
    let mut lines = sink.subscribe();
    let recorder = Recorder::default();

    let control = Arc::new(
        Control::new(
            StillCamera(scene()),
            ObjectDetector::new(Box::new(CubeAhead) as Box<dyn DetectorOracle>, DetectorRequest::default()),
            LaneDetector::default(),
            Arc::new(sink),
            Arc::new(Robot::connect(Box::new(recorder.clone()))),
        )
        .with_period(Duration::from_millis(200)),
    );

    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(control.clone().run(rx));

    let things = timeout(Duration::from_secs(5), lines.recv()).await.unwrap().unwrap();
    let lanes = timeout(Duration::from_secs(5), lines.recv()).await.unwrap().unwrap();

    tx.send(true).unwrap();
    let started = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(started >= 1);

    let things: Vec<Record> = serde_json::from_str(&things).unwrap();
    assert_eq!(things.len(), 1);
    assert_eq!(things[0].name, "Cube");
    assert_eq!((things[0].az, things[0].el), (0, 380));

    let lanes: Vec<Record> = serde_json::from_str(&lanes).unwrap();
    assert_eq!(lanes.len(), 1);
    assert_eq!(lanes[0].xyxy, [240, 240, 340, 240]);

    let best = recorder.events("camera.best");
    assert!(!best.is_empty());
    assert_eq!(best[0], vec![0, 0, 0, 0, 90, 0, 0, 380, 0, 0, 0, 0]);
    assert_eq!(recorder.events("camera.lane")[0], vec![-94, 684, 0]);
    assert_eq!(recorder.events("camera.detect")[0], vec![1, 90, 0, 0, 380]);

    assert_eq!(control.things().len(), 1);
    assert_eq!(control.lanes().len(), 1);
}

#[tokio::test]
async fn remote_buttons_become_command_events() {
    let recorder = Recorder::default();
    let remote = Remote::new(Arc::new(Robot::connect(Box::new(recorder.clone()))));

    let input: &[u8] = b"{\"button\": 17}\n{\"button\": null}\n{\"program\": 3}\n";
    let handled = remote.run(input).await.unwrap();

    assert_eq!(handled, 1);
    assert_eq!(recorder.events("command"), vec![vec![17]]);
}

#[tokio::test]
async fn remote_survives_lines_that_are_not_utf8() {
    let recorder = Recorder::default();
    let remote = Remote::new(Arc::new(Robot::connect(Box::new(recorder.clone()))));

    let input: &[u8] = b"{\"button\": 1}\n\xff\xfe garbage\n{\"button\": 2}\n";
    let handled = remote.run(input).await.unwrap();

    assert_eq!(handled, 2);
    assert_eq!(recorder.events("command"), vec![vec![1], vec![2]]);
}
