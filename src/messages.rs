use crate::audio::{AudioFormat, InputDevice};
use crate::services::SegmentSettings;
use anyhow::{Context, Result};
use std::fmt;

/// Placeholder performance score; no comparison against the reference exists yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score(pub u32);

impl Score {
    pub const PLACEHOLDER: Score = Score(0);
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of analysing one take. Takes finish in any order.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisEvent {
    pub sequence: u64,
    pub outcome: AnalysisOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Scored(Score),
    Failed(String),
}

/// Requests for the recorder service
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderCommand {
    /// Arm the loop on the device at `device` in the filtered input list
    Start {
        device: usize,
        duration_secs: f64,
        format: AudioFormat,
    },
    Stop,
    ListDevices,
}

/// What the recorder service reports back
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    Armed(SegmentSettings),
    ArmFailed(String),
    Stopped,
    Devices(Vec<InputDevice>),
    DevicesFailed(String),
}

/// Commands accepted by the interactive shell
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Pause,
    Seek(f64),
    Record,
    Stop,
    Devices,
    Status,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();

        let command = match verb.as_str() {
            "play" | "p" => Command::Play,
            "pause" => Command::Pause,
            "seek" => {
                let arg = words.next().context("seek needs a position in seconds")?;
                let secs = arg
                    .parse::<f64>()
                    .with_context(|| format!("Invalid seek position: {}", arg))?;
                Command::Seek(secs)
            }
            "record" | "rec" => Command::Record,
            "stop" => Command::Stop,
            "devices" => Command::Devices,
            "status" | "" => Command::Status,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(anyhow::anyhow!("Unknown command: {}", other)),
        };

        Ok(command)
    }
}
