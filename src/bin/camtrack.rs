use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use camtrack::config::{Config, SinkKind};
use camtrack::control::shutdown_on;
use camtrack::{
    Camera, Control, DetectorOracle, ObjectDetector, PipeNode, PipeSink, ProgramCatalogue, Remote,
    Robot, Sink, TopicSink,
};

#[derive(Parser)]
#[command(name = "camtrack")]
#[command(about = "Track objects and lanes seen by a robot camera")]
#[command(version)]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Robot bridge pipe; none runs headless.
    #[arg(long, global = true)]
    link: Option<PathBuf>,

    /// Log filter, e.g. `camtrack=debug`.
    #[arg(long, global = true, default_value = "camtrack=info")]
    loglevel: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control loop.
    Run {
        /// Cycles per second.
        #[arg(long)]
        freq: Option<f64>,

        /// Pipe receiving the detection lines.
        #[arg(long)]
        fifo: Option<PathBuf>,

        /// Pipe carrying remote-control messages.
        #[arg(long)]
        remote_fifo: Option<PathBuf>,
    },

    /// Power the robot off.
    Stop,

    /// List robot programs.
    Programs {
        /// Program directory; defaults to the configured one.
        dir: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("cannot load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn connect_robot(config: &Config) -> Result<Robot> {
    let robot = match &config.robot.link {
        Some(link) => Robot::connect(Box::new(
            PipeNode::open(link).with_context(|| format!("cannot open {}", link.display()))?,
        )),
        None => {
            warn!("no robot link, running headless");
            Robot::headless()
        }
    };

    let catalogue = match &config.robot.programs {
        Some(dir) => ProgramCatalogue::scan(dir).unwrap_or_else(|err| {
            warn!("cannot scan programs in {}: {}", dir.display(), err);
            ProgramCatalogue::default()
        }),
        None => ProgramCatalogue::default(),
    };

    Ok(robot
        .with_catalogue(catalogue)
        .with_default_program(config.robot.default_program.clone()))
}

fn open_sink(config: &Config) -> Result<Arc<dyn Sink>> {
    match config.output.sink {
        SinkKind::Pipe => {
            let fifo = &config.output.fifo;
            let sink = PipeSink::open(fifo)
                .with_context(|| format!("cannot open output {}", fifo.display()))?;
            Ok(Arc::new(sink))
        }

        SinkKind::Topic => {
            let sink = TopicSink::default();
            let mut rx = sink.subscribe();

            tokio::spawn(async move {
                while let Ok(line) = rx.recv().await {
                    debug!("topic: {}", line);
                }
            });

            Ok(Arc::new(sink))
        }
    }
}

#[cfg(feature = "opencv")]
fn open_devices(config: &Config) -> Result<(camtrack::capture::CvCamera, Box<dyn DetectorOracle>)> {
    use camtrack::capture::{CvCamera, CvYolo};
    use camtrack::{NoDetector, YoloDecoder};

    let camera = CvCamera::open(config.detector.camera)?;
    let oracle: Box<dyn DetectorOracle> = match &config.detector.model {
        Some(model) => Box::new(CvYolo::load(
            model,
            YoloDecoder::new(config.detector.iou_threshold),
        )?),
        None => {
            warn!("no detector model, objects will not be detected");
            Box::new(NoDetector)
        }
    };

    Ok((camera, oracle))
}

#[cfg(not(feature = "opencv"))]
fn open_devices(_: &Config) -> Result<(camtrack::NoCamera, Box<dyn DetectorOracle>)> {
    warn!("built without opencv, no camera available");
    Ok((camtrack::NoCamera, Box::new(camtrack::NoDetector)))
}

async fn run_control<C: Camera + 'static>(
    camera: C,
    oracle: Box<dyn DetectorOracle>,
    config: Config,
    sink: Arc<dyn Sink>,
    robot: Arc<Robot>,
) -> Result<()> {
    let mut objects = ObjectDetector::new(oracle, config.detector.request());
    if let Some(map) = &config.detector.class_map {
        objects = objects.with_class_map(map.clone());
    }

    let control = Arc::new(
        Control::new(camera, objects, config.lanes.detector(), sink, robot)
            .with_period(config.control.period())
            .with_grace(config.control.grace())
            .with_target_elevation_limit(config.detector.target_max_elevation),
    );

    let shutdown = shutdown_on(tokio::signal::ctrl_c());
    let cycles = control.run(shutdown).await;
    info!("ran {} cycles", cycles);

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let sink = open_sink(&config)?;
    let robot = Arc::new(connect_robot(&config)?);
    robot.start();

    if let Some(path) = config.output.remote_fifo.clone() {
        let remote = Remote::new(robot.clone());
        tokio::spawn(async move {
            if let Err(err) = remote.listen(&path).await {
                warn!("remote control stopped: {}", err);
            }
        });
    }

    let (camera, oracle) = open_devices(&config)?;
    run_control(camera, oracle, config, sink, robot).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.loglevel)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("camtrack=info")),
        )
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if cli.link.is_some() {
        config.robot.link = cli.link;
    }

    match cli.command {
        Commands::Run {
            freq,
            fifo,
            remote_fifo,
        } => {
            if let Some(freq) = freq {
                config.control.freq_hz = freq;
            }
            if let Some(fifo) = fifo {
                config.output.fifo = fifo;
            }
            if remote_fifo.is_some() {
                config.output.remote_fifo = remote_fifo;
            }

            run(config).await
        }

        Commands::Stop => {
            connect_robot(&config)?.stop();
            Ok(())
        }

        Commands::Programs { dir } => {
            let dir = dir
                .or(config.robot.programs)
                .context("no program directory given")?;

            for program in ProgramCatalogue::scan(&dir)?.iter() {
                println!("{}\t{}", program.file, program.name);
            }

            Ok(())
        }
    }
}
