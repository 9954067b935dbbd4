use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_derive::Serialize;
use tracing::{debug, info, warn};

use crate::error::Error;

/// Events the camera sends, with their payload sizes.
pub const CAMERA_EVENTS: &[(&str, usize)] = &[
    ("camera.detect", 5),
    ("camera.best", 12),
    ("camera.lane", 3),
];

/// Program that switches the robot off.
pub const POWEROFF: &str = "call _poweroff()";

pub const PROGRAM_EXTENSION: &str = "aesl";

/// Connection to the robot's program runner.
pub trait Node: Send {
    fn register_events(&mut self, events: &[(&str, usize)]) -> Result<(), Error>;

    fn send_event(&mut self, name: &str, values: &[i32]) -> Result<(), Error>;

    fn set_variable(&mut self, name: &str, values: &[i32]) -> Result<(), Error>;

    /// Compiles and installs `source`; does not start it.
    fn load_program(&mut self, source: &str) -> Result<(), Error>;

    fn run(&mut self) -> Result<(), Error>;
}

#[derive(Serialize)]
struct EventDecl<'a> {
    name: &'a str,
    size: usize,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum NodeMessage<'a> {
    Register { events: Vec<EventDecl<'a>> },
    Event { name: &'a str, values: &'a [i32] },
    Variable { name: &'a str, values: &'a [i32] },
    Program { source: &'a str },
    Run,
}

/// Node speaking JSON lines over a pipe to a bridge process.
pub struct PipeNode<W> {
    out: W,
}

impl PipeNode<fs::File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        info!("robot link on {}", path.as_ref().display());

        Ok(Self::new(file))
    }
}

impl<W: Write + Send> PipeNode<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn send(&mut self, message: &NodeMessage<'_>) -> Result<(), Error> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        self.out.write_all(&line)?;
        self.out.flush()?;

        Ok(())
    }
}

impl<W: Write + Send> Node for PipeNode<W> {
    fn register_events(&mut self, events: &[(&str, usize)]) -> Result<(), Error> {
        let events = events
            .iter()
            .map(|&(name, size)| EventDecl { name, size })
            .collect();

        self.send(&NodeMessage::Register { events })
    }

    fn send_event(&mut self, name: &str, values: &[i32]) -> Result<(), Error> {
        self.send(&NodeMessage::Event { name, values })
    }

    fn set_variable(&mut self, name: &str, values: &[i32]) -> Result<(), Error> {
        self.send(&NodeMessage::Variable { name, values })
    }

    fn load_program(&mut self, source: &str) -> Result<(), Error> {
        self.send(&NodeMessage::Program { source })
    }

    fn run(&mut self) -> Result<(), Error> {
        self.send(&NodeMessage::Run)
    }
}

/// A robot program found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Program {
    pub name: String,
    pub file: String,
    pub path: PathBuf,
}

impl Program {
    /// Display name comes from a sibling `.json` file's `name` field, or
    /// from the cleaned file stem.
    pub fn load(path: &Path) -> Self {
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        let name = meta_name(path).unwrap_or_else(|| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();

            clean_name(&stem)
        });

        Self {
            name,
            file,
            path: path.to_path_buf(),
        }
    }

    pub fn source(&self) -> Result<String, Error> {
        Ok(fs::read_to_string(&self.path)?)
    }
}

fn meta_name(path: &Path) -> Option<String> {
    let meta = path.with_extension("json");
    let text = fs::read_to_string(&meta).ok()?;

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => value.get("name")?.as_str().map(str::to_string),
        Err(err) => {
            debug!("ignoring {}: {}", meta.display(), err);
            None
        }
    }
}

/// `01-follow_line` becomes `follow line`.
pub fn clean_name(stem: &str) -> String {
    let digits = stem.len() - stem.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    let stem = match stem[digits..].strip_prefix('-') {
        Some(rest) if digits > 0 => rest,
        _ => stem,
    };

    stem.replace('_', " ")
}

/// Robot programs available for selection, sorted by file name.
#[derive(Debug, Clone, Default)]
pub struct ProgramCatalogue {
    programs: Vec<Program>,
}

impl ProgramCatalogue {
    pub fn scan<P: AsRef<Path>>(dir: P) -> Result<Self, Error> {
        let mut programs = Vec::new();

        for entry in fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == PROGRAM_EXTENSION) {
                let program = Program::load(&path);
                debug!("program {} = {}", program.file, program.name);
                programs.push(program);
            }
        }

        programs.sort_by(|a, b| a.file.cmp(&b.file));
        info!("{} programs in {}", programs.len(), dir.as_ref().display());

        Ok(Self { programs })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Program> {
        self.programs.iter()
    }

    /// Looks a program up by display name or file name.
    pub fn get(&self, name: &str) -> Option<&Program> {
        self.programs
            .iter()
            .find(|p| p.name == name || p.file == name)
    }
}

/// Shared handle on the robot. Every node call takes the lock for its own
/// duration; without a node every call is a no-op.
pub struct Robot {
    node: Mutex<Option<Box<dyn Node>>>,
    catalogue: ProgramCatalogue,
    default_program: Option<String>,
}

impl Robot {
    pub fn headless() -> Self {
        Self {
            node: Mutex::new(None),
            catalogue: ProgramCatalogue::default(),
            default_program: None,
        }
    }

    pub fn connect(node: Box<dyn Node>) -> Self {
        Self {
            node: Mutex::new(Some(node)),
            ..Self::headless()
        }
    }

    pub fn with_catalogue(mut self, catalogue: ProgramCatalogue) -> Self {
        self.catalogue = catalogue;
        self
    }

    pub fn with_default_program(mut self, name: Option<String>) -> Self {
        self.default_program = name;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.node
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    #[inline]
    pub fn programs(&self) -> &ProgramCatalogue {
        &self.catalogue
    }

    fn with_node<F>(&self, what: &str, f: F)
    where
        F: FnOnce(&mut dyn Node) -> Result<(), Error>,
    {
        let mut guard = self.node.lock().unwrap_or_else(PoisonError::into_inner);

        match guard.as_deref_mut() {
            Some(node) => {
                if let Err(err) = f(node) {
                    warn!("robot {} failed: {}", what, err);
                }
            }
            None => debug!("no robot node, dropping {}", what),
        }
    }

    /// Registers the camera events and starts the default program.
    pub fn start(&self) {
        self.with_node("register", |node| node.register_events(CAMERA_EVENTS));

        match self.default_program.as_deref() {
            Some(name) => {
                if let Err(err) = self.select_program(name) {
                    warn!("cannot start default program: {}", err);
                }
            }
            None => info!("no default program"),
        }
    }

    pub fn event(&self, name: &str, values: &[i32]) {
        debug!("robot event {} {:?}", name, values);
        self.with_node(name, |node| node.send_event(name, values));
    }

    pub fn variables(&self, assignments: &[(&str, Vec<i32>)]) {
        for (name, values) in assignments {
            info!("robot set variable {}", name);
            self.with_node(name, |node| node.set_variable(name, values));
        }
    }

    /// Loads and runs `source` under a single lock.
    pub fn run_program(&self, source: &str) {
        self.with_node("program", |node| {
            node.load_program(source)?;
            node.run()
        });
    }

    pub fn select_program(&self, name: &str) -> Result<(), Error> {
        let program = self
            .catalogue
            .get(name)
            .ok_or_else(|| Error::UnknownProgram(name.to_string()))?;

        let source = program.source()?;
        info!("running program {} ({})", program.name, program.file);
        self.run_program(&source);

        Ok(())
    }

    pub fn stop(&self) {
        info!("powering robot off");
        self.run_program(POWEROFF);
    }
}
