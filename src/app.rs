use crate::audio::{
    CaptureEngine, CpalSource, InputDevice, PlaybackOutput, RodioOutput, SilentOutput,
};
use crate::config::Config;
use crate::messages::{
    AnalysisEvent, AnalysisOutcome, Command, RecorderCommand, RecorderEvent, Score,
};
use crate::pitch::YinPitchExtractor;
use crate::services::{AnalysisDispatcher, Recorder, SegmentSettings};
use crate::track::Track;
use crate::transport::{PlaybackStatus, Transport};

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long to sleep when no transport timer is pending
const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct App {
    config: Config,
    track: Arc<Track>,
    transport: Transport<Box<dyn PlaybackOutput>>,
    dispatcher: Arc<AnalysisDispatcher>,
    score_rx: mpsc::UnboundedReceiver<AnalysisEvent>,
    recorder_tx: mpsc::UnboundedSender<RecorderCommand>,
    recorder_events: mpsc::UnboundedReceiver<RecorderEvent>,
    recorder: JoinHandle<()>,
    recording: Option<SegmentSettings>,
    last_status: PlaybackStatus,
    last_score: Option<Score>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let track = Arc::new(Track::load(&config.song_path, config.track_meta())?);
        tracing::info!(
            "{} - {} ({:.0} bpm)",
            track.meta.artist,
            track.meta.title,
            track.meta.bpm
        );

        let output: Box<dyn PlaybackOutput> = match RodioOutput::open(&track) {
            Ok(output) => Box::new(output),
            Err(e) => {
                tracing::warn!("Playback disabled: {:#}", e);
                Box::new(SilentOutput)
            }
        };

        let mut transport = Transport::new(
            track.timing(),
            output,
            config.tick_interval(),
            config.count_in_beats,
        );
        transport.set_metronome(config.metronome_enabled);

        let engine = Arc::new(CaptureEngine::new(Arc::new(CpalSource::new())));
        let extractor = Arc::new(YinPitchExtractor::new(engine.artifact_dir().to_path_buf()));
        let (score_tx, score_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(AnalysisDispatcher::new(extractor, score_tx));

        // Captures block for whole takes, so the recorder runs apart from the
        // shell and the transport timers keep firing on time
        let (recorder_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, recorder_events) = mpsc::unbounded_channel();
        let recorder = tokio::spawn(
            Recorder::new(engine, dispatcher.clone(), cmd_rx, event_tx).run(),
        );

        Ok(Self {
            config,
            track,
            transport,
            dispatcher,
            score_rx,
            recorder_tx,
            recorder_events,
            recorder,
            recording: None,
            last_status: PlaybackStatus::Stopped,
            last_score: None,
        })
    }

    pub async fn run(mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        tracing::info!("Ready! Commands: play, pause, seek <secs>, record, stop, devices, status, quit");

        loop {
            let deadline = self
                .transport
                .next_deadline()
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + IDLE_POLL);

            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        tracing::info!("Input closed, shutting down");
                        break;
                    };
                    match Command::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => self.handle_command(command),
                        Err(e) => tracing::warn!("{:#}", e),
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    self.on_tick();
                }

                Some(event) = self.score_rx.recv() => {
                    self.on_analysis(event);
                }

                Some(event) = self.recorder_events.recv() => {
                    self.on_recorder(event);
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        tracing::info!("Rehearsal shutdown complete");
        Ok(())
    }

    fn handle_command(&mut self, command: Command) {
        let now = Instant::now();

        match command {
            Command::Play => self.transport.play(now),
            Command::Pause => self.transport.pause(now),
            Command::Seek(secs) => self.transport.seek(secs, now),
            Command::Record => self.send_recorder(RecorderCommand::Start {
                device: self.config.input_device,
                duration_secs: self.config.record_duration_secs,
                format: self.config.capture_format(),
            }),
            Command::Stop => self.send_recorder(RecorderCommand::Stop),
            Command::Devices => self.send_recorder(RecorderCommand::ListDevices),
            Command::Status => self.print_status(),
            Command::Quit => {}
        }

        self.on_tick();
    }

    fn on_tick(&mut self) {
        let snapshot = self.transport.poll(Instant::now());
        if snapshot.status != self.last_status {
            tracing::info!("{:?} {}", snapshot.status, snapshot.label());
            self.last_status = snapshot.status;
        }
    }

    fn on_analysis(&mut self, event: AnalysisEvent) {
        log_analysis(&event);
        if let AnalysisOutcome::Scored(score) = event.outcome {
            self.last_score = Some(score);
        }
    }

    fn send_recorder(&self, command: RecorderCommand) {
        if self.recorder_tx.send(command).is_err() {
            tracing::error!("Recorder service is not running");
        }
    }

    fn on_recorder(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Armed(settings) => {
                tracing::info!(
                    "Recording {:.1}s takes from {}",
                    settings.duration_secs,
                    settings.device.name
                );
                self.recording = Some(settings);
            }
            RecorderEvent::ArmFailed(reason) => {
                tracing::error!("Could not start recording: {}", reason);
            }
            RecorderEvent::Stopped => {
                tracing::info!("Recording stopped");
                self.recording = None;
            }
            RecorderEvent::Devices(devices) => self.print_devices(&devices),
            RecorderEvent::DevicesFailed(reason) => {
                tracing::error!("Could not list input devices: {}", reason);
            }
        }
    }

    fn print_devices(&self, devices: &[InputDevice]) {
        if devices.is_empty() {
            tracing::info!("No input devices found");
        }
        for (position, device) in devices.iter().enumerate() {
            let marker = if position == self.config.input_device { "*" } else { " " };
            tracing::info!(
                "{} [{}] {} ({} ch, {})",
                marker,
                position,
                device.name,
                device.max_input_channels,
                device.host_api
            );
        }
    }

    fn print_status(&self) {
        let snapshot = self.transport.snapshot();
        let recording = match &self.recording {
            Some(settings) => format!(
                "recording {:.1}s takes from {}",
                settings.duration_secs, settings.device.name
            ),
            None => "not recording".to_string(),
        };
        let score = self
            .last_score
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());

        tracing::info!(
            "{} - {} | {:?} {} ({:.0}%) | {} | Score: {}",
            self.track.meta.artist,
            self.track.meta.title,
            snapshot.status,
            snapshot.label(),
            snapshot.progress() * 100.0,
            recording,
            score
        );
    }

    async fn shutdown(mut self) {
        self.transport.pause(Instant::now());

        // Closing the command channel disarms the loop once its take finishes
        drop(self.recorder_tx);
        if let Err(e) = self.recorder.await {
            tracing::error!("Recorder service failed: {}", e);
        }
        while let Ok(event) = self.recorder_events.try_recv() {
            if event == RecorderEvent::Stopped {
                tracing::info!("Recording stopped");
            }
        }

        self.dispatcher.wait_idle().await;
        while let Ok(event) = self.score_rx.try_recv() {
            log_analysis(&event);
        }
    }
}

fn log_analysis(event: &AnalysisEvent) {
    match &event.outcome {
        AnalysisOutcome::Scored(score) => {
            tracing::info!("Score: {} (take {})", score, event.sequence);
        }
        AnalysisOutcome::Failed(reason) => {
            tracing::warn!("Take {} could not be scored: {}", event.sequence, reason);
        }
    }
}
