use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::robot::Robot;

/// Robot event carrying remote buttons.
pub const COMMAND_EVENT: &str = "command";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMessage {
    Button(i64),
    Program(String),
}

impl RemoteMessage {
    /// `{"button": 12}` or `{"program": "name"}`. A button given as a
    /// numeric string is accepted.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(line)?;

        if let Some(button) = value.get("button") {
            let button = match button {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };

            return button
                .map(RemoteMessage::Button)
                .ok_or_else(|| Error::RemoteMessage(format!("invalid button in {}", line)));
        }

        match value.get("program") {
            Some(Value::String(name)) => Ok(RemoteMessage::Program(name.clone())),
            _ => Err(Error::RemoteMessage(line.to_string())),
        }
    }
}

/// Forwards remote-control messages to the robot.
pub struct Remote {
    robot: Arc<Robot>,
}

impl Remote {
    pub fn new(robot: Arc<Robot>) -> Self {
        Self { robot }
    }

    pub fn handle(&self, message: RemoteMessage) -> Result<(), Error> {
        match message {
            RemoteMessage::Button(button) => {
                info!("button {} from remote", button);
                let button = i32::try_from(button)
                    .map_err(|_| Error::RemoteMessage(format!("button {} out of range", button)))?;

                self.robot.event(COMMAND_EVENT, &[button]);
                Ok(())
            }

            RemoteMessage::Program(name) => {
                info!("program {} from remote", name);
                self.robot.select_program(&name)
            }
        }
    }

    /// Handles every line of `reader` until end of input. Bad messages are
    /// logged and skipped. Returns the number of messages handled.
    pub async fn run<R: AsyncBufRead + Unpin>(&self, reader: R) -> Result<usize, Error> {
        let mut lines = reader.split(b'\n');
        let mut handled = 0;

        while let Some(raw) = lines.next_segment().await? {
            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line.trim(),
                Err(err) => {
                    warn!("ignoring remote line that is not utf-8: {}", err);
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            let result = RemoteMessage::parse(line).and_then(|message| self.handle(message));
            match result {
                Ok(()) => handled += 1,
                Err(err) => warn!("ignoring remote message: {}", err),
            }
        }

        Ok(handled)
    }

    /// Reads the named pipe at `path`, reopening it each time the writer
    /// side closes.
    pub async fn listen<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        info!("remote control on {}", path.display());

        loop {
            let file = tokio::fs::File::open(path).await?;
            let handled = self.run(BufReader::new(file)).await?;
            debug!("remote writer closed after {} messages", handled);
        }
    }
}
