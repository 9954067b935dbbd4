use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::detector::DetectorOracle;
use crate::feature::Record;
use crate::frame::Camera;
use crate::lane::{LaneDetector, LaneList};
use crate::robot::Robot;
use crate::sink::Sink;
use crate::thing::{ObjectDetector, ThingList};

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Periodic capture, tracking and publishing.
///
/// Cycles run on the blocking pool and may overlap; each track list is
/// only touched under its own lock.
pub struct Control<C: Camera> {
    camera: Mutex<C>,
    things: Mutex<ThingList>,
    lanes: Mutex<LaneList>,
    objects: ObjectDetector<Box<dyn DetectorOracle>>,
    lane_detector: LaneDetector,
    sink: Arc<dyn Sink>,
    robot: Arc<Robot>,
    period: Duration,
    grace: Duration,
}

impl<C: Camera + 'static> Control<C> {
    pub fn new(
        camera: C,
        objects: ObjectDetector<Box<dyn DetectorOracle>>,
        lane_detector: LaneDetector,
        sink: Arc<dyn Sink>,
        robot: Arc<Robot>,
    ) -> Self {
        Self {
            camera: Mutex::new(camera),
            things: Mutex::new(ThingList::new()),
            lanes: Mutex::new(LaneList::new()),
            objects,
            lane_detector,
            sink,
            robot,
            period: DEFAULT_PERIOD,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_target_elevation_limit(mut self, limit: Option<i32>) -> Self {
        if let Some(limit) = limit {
            self.things = Mutex::new(ThingList::new().with_target_elevation_limit(limit));
        }
        self
    }

    pub fn things(&self) -> Vec<Record> {
        lock(&self.things).format()
    }

    pub fn lanes(&self) -> Vec<Record> {
        lock(&self.lanes).format()
    }

    /// One capture, track and publish pass.
    pub fn cycle(&self) {
        let frame = lock(&self.camera).capture();

        let (things, best, detects) = {
            let mut things = lock(&self.things);
            match &frame {
                Ok(frame) => things.refresh(&self.objects, frame),
                Err(_) => things.merge(Vec::new()),
            }
            things.update_targets();

            (things.format(), things.event(), things.detect_events())
        };

        let (lanes, lane) = {
            let mut lanes = lock(&self.lanes);
            match &frame {
                Ok(frame) => lanes.refresh(&self.lane_detector, frame),
                Err(_) => lanes.merge(Vec::new()),
            }
            lanes.update_targets();

            (lanes.format(), lanes.event())
        };

        if let Err(err) = &frame {
            warn!("capture failed, ageing tracks: {}", err);
        }

        for records in [&things, &lanes] {
            match serde_json::to_string(records) {
                Ok(line) => {
                    if let Err(err) = self.sink.publish(&line) {
                        warn!("publish failed: {}", err);
                    } else {
                        debug!("published {}", line);
                    }
                }
                Err(err) => warn!("cannot serialize records: {}", err),
            }
        }

        self.robot.event("camera.best", &best);
        self.robot.event("camera.lane", &lane);
        for event in &detects {
            self.robot.event("camera.detect", event);
        }
    }

    /// Runs cycles every period until `shutdown` turns true or its sender
    /// goes away, then waits up to the grace period for running cycles.
    /// Returns the number of cycles started.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> usize {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycles = JoinSet::new();
        let mut started = 0;

        info!("control loop fires every {:?}", self.period);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    let control = self.clone();
                    cycles.spawn_blocking(move || control.cycle());
                    started += 1;
                }

                Some(res) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(err) = res {
                        warn!("cycle panicked: {}", err);
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("control loop stopping, {} cycles in flight", cycles.len());

        let drain = async {
            while let Some(res) = cycles.join_next().await {
                if let Err(err) = res {
                    warn!("cycle panicked: {}", err);
                }
            }
        };

        if time::timeout(self.grace, drain).await.is_err() {
            warn!("abandoning {} cycles after {:?}", cycles.len(), self.grace);
            cycles.abort_all();
        }

        started
    }
}

/// Shutdown flag that turns true once `signal` resolves. If the signal
/// cannot be listened for, the flag stays false for good.
pub fn shutdown_on<F>(signal: F) -> watch::Receiver<bool>
where
    F: Future<Output = io::Result<()>> + Send + 'static,
{
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        if let Err(err) = signal.await {
            warn!("cannot listen for shutdown signal: {}", err);
            // dropping the sender would stop the loop
            std::future::pending::<()>().await;
        }

        info!("interrupted, shutting down");
        let _ = tx.send(true);
    });

    rx
}
