use super::analysis::AnalysisDispatcher;
use super::recording_loop::{RecordingLoop, SegmentSettings};
use crate::audio::{AudioFormat, CaptureEngine};
use crate::error::{CoreError, Result};
use crate::messages::{RecorderCommand, RecorderEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Owns the recording loop on behalf of the shell
///
/// This service:
/// - Selects and probes input devices off the async threads
/// - Arms and disarms the recording loop, waiting out in-flight takes
/// - Reports every state change as a `RecorderEvent`
///
/// Commands are handled in order, so a stop sent while arming applies to
/// the freshly armed loop. Whoever sends commands never waits on a capture.
pub struct Recorder {
    engine: Arc<CaptureEngine>,
    dispatcher: Arc<AnalysisDispatcher>,
    cmd_rx: mpsc::UnboundedReceiver<RecorderCommand>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    active: Option<RecordingLoop>,
}

impl Recorder {
    pub fn new(
        engine: Arc<CaptureEngine>,
        dispatcher: Arc<AnalysisDispatcher>,
        cmd_rx: mpsc::UnboundedReceiver<RecorderCommand>,
        events: mpsc::UnboundedSender<RecorderEvent>,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            cmd_rx,
            events,
            active: None,
        }
    }

    /// Serve commands until every sender is gone, then disarm
    pub async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle_command(cmd).await;
        }

        self.stop().await;
        tracing::debug!("Recorder service exiting");
    }

    async fn handle_command(&mut self, cmd: RecorderCommand) {
        match cmd {
            RecorderCommand::Start {
                device,
                duration_secs,
                format,
            } => self.start(device, duration_secs, format).await,
            RecorderCommand::Stop => self.stop().await,
            RecorderCommand::ListDevices => self.list_devices().await,
        }
    }

    async fn start(&mut self, position: usize, duration_secs: f64, format: AudioFormat) {
        if self.active.as_ref().is_some_and(|r| r.is_armed()) {
            tracing::info!("Already recording");
            return;
        }

        let event = match self.arm(position, duration_secs, format).await {
            Ok(recording_loop) => {
                let settings = recording_loop.settings().clone();
                self.active = Some(recording_loop);
                RecorderEvent::Armed(settings)
            }
            Err(e) => {
                tracing::error!("Could not start recording: {}", e);
                RecorderEvent::ArmFailed(e.to_string())
            }
        };
        self.send(event);
    }

    async fn arm(
        &self,
        position: usize,
        duration_secs: f64,
        format: AudioFormat,
    ) -> Result<RecordingLoop> {
        let engine = self.engine.clone();
        let device = tokio::task::spawn_blocking(move || engine.select_device(position))
            .await
            .map_err(|e| CoreError::unavailable(position, e))??;

        let settings = SegmentSettings {
            device,
            duration_secs,
            format,
        };
        let mut recording_loop =
            RecordingLoop::new(self.engine.clone(), self.dispatcher.clone(), settings);
        recording_loop.start().await?;
        Ok(recording_loop)
    }

    async fn stop(&mut self) {
        match self.active.take() {
            Some(mut recording_loop) => {
                recording_loop.stop().await;
                self.send(RecorderEvent::Stopped);
            }
            None => tracing::debug!("Not recording"),
        }
    }

    async fn list_devices(&self) {
        let engine = self.engine.clone();
        let event = match tokio::task::spawn_blocking(move || engine.input_devices()).await {
            Ok(Ok(devices)) => RecorderEvent::Devices(devices),
            Ok(Err(e)) => RecorderEvent::DevicesFailed(e.to_string()),
            Err(e) => RecorderEvent::DevicesFailed(e.to_string()),
        };
        self.send(event);
    }

    fn send(&self, event: RecorderEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No listener for recorder events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PlaybackOutput;
    use crate::audio::capture::testing::{FakeSource, test_device};
    use crate::services::analysis::testing::FakeExtractor;
    use crate::track::TrackTiming;
    use crate::transport::{PlaybackStatus, Transport};
    use std::time::{Duration, Instant};
    use tokio::task::JoinHandle;

    struct Harness {
        source: Arc<FakeSource>,
        dispatcher: Arc<AnalysisDispatcher>,
        commands: mpsc::UnboundedSender<RecorderCommand>,
        events: mpsc::UnboundedReceiver<RecorderEvent>,
        service: JoinHandle<()>,
    }

    fn harness(source: FakeSource) -> Harness {
        let source = Arc::new(source);
        let engine = Arc::new(CaptureEngine::with_artifact_dir(
            source.clone(),
            std::env::temp_dir(),
        ));
        let (analysis_tx, _analysis_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(AnalysisDispatcher::new(
            Arc::new(FakeExtractor::new()),
            analysis_tx,
        ));
        let (commands, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let recorder = Recorder::new(engine, dispatcher.clone(), cmd_rx, events_tx);

        Harness {
            source,
            dispatcher,
            commands,
            events,
            service: tokio::spawn(recorder.run()),
        }
    }

    fn start_command() -> RecorderCommand {
        RecorderCommand::Start {
            device: 0,
            duration_secs: 0.01,
            format: AudioFormat::default(),
        }
    }

    #[derive(Default)]
    struct ClickTimes {
        clicks: Vec<Instant>,
        started: Option<Instant>,
    }

    impl PlaybackOutput for ClickTimes {
        fn start(&mut self, _from: Duration) {
            self.started = Some(Instant::now());
        }

        fn pause(&mut self) {}

        fn click(&mut self) {
            self.clicks.push(Instant::now());
        }
    }

    #[tokio::test]
    async fn test_start_reports_armed_settings() {
        let mut h = harness(FakeSource::new());

        h.commands.send(start_command()).unwrap();
        match h.events.recv().await.unwrap() {
            RecorderEvent::Armed(settings) => {
                assert_eq!(settings.device, test_device());
                assert_eq!(settings.duration_secs, 0.01);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        h.commands.send(RecorderCommand::Stop).unwrap();
        assert_eq!(h.events.recv().await.unwrap(), RecorderEvent::Stopped);
        h.dispatcher.wait_idle().await;
    }

    #[tokio::test]
    async fn test_missing_device_fails_to_arm() {
        let mut h = harness(FakeSource::new());

        h.commands
            .send(RecorderCommand::Start {
                device: 5,
                duration_secs: 0.01,
                format: AudioFormat::default(),
            })
            .unwrap();

        assert!(matches!(
            h.events.recv().await.unwrap(),
            RecorderEvent::ArmFailed(_)
        ));
        assert_eq!(h.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_lists_devices() {
        let mut h = harness(FakeSource::new());

        h.commands.send(RecorderCommand::ListDevices).unwrap();
        assert_eq!(
            h.events.recv().await.unwrap(),
            RecorderEvent::Devices(vec![test_device()])
        );
    }

    #[tokio::test]
    async fn test_dropping_commands_disarms() {
        let mut h = harness(FakeSource::new());

        h.commands.send(start_command()).unwrap();
        assert!(matches!(
            h.events.recv().await.unwrap(),
            RecorderEvent::Armed(_)
        ));

        drop(h.commands);
        h.service.await.unwrap();
        assert_eq!(h.events.recv().await.unwrap(), RecorderEvent::Stopped);

        let captured = h.source.calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.source.calls(), captured);
        h.dispatcher.wait_idle().await;
    }

    #[tokio::test]
    async fn test_count_in_keeps_time_while_stop_is_pending() {
        let mut h = harness(FakeSource {
            delay: Duration::from_millis(400),
            ..FakeSource::new()
        });

        h.commands.send(start_command()).unwrap();
        assert!(matches!(
            h.events.recv().await.unwrap(),
            RecorderEvent::Armed(_)
        ));
        while h.source.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // a take is in flight, so the stop cannot finish for a while
        h.commands.send(RecorderCommand::Stop).unwrap();

        // 600 bpm: a click every 100ms
        let timing = TrackTiming {
            duration: Duration::from_secs(10),
            bpm: 600.0,
            first_beat: Duration::ZERO,
        };
        let mut transport = Transport::new(
            timing,
            ClickTimes::default(),
            Duration::from_millis(10),
            4,
        );
        transport.play(Instant::now());

        let mut stopped_at = None;
        while transport.status() != PlaybackStatus::Playing {
            let deadline = transport
                .next_deadline()
                .map(tokio::time::Instant::from_std)
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_millis(10));

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    transport.poll(Instant::now());
                }
                Some(event) = h.events.recv() => {
                    assert_eq!(event, RecorderEvent::Stopped);
                    stopped_at = Some(Instant::now());
                }
            }
        }

        if stopped_at.is_none() {
            assert_eq!(h.events.recv().await.unwrap(), RecorderEvent::Stopped);
            stopped_at = Some(Instant::now());
        }

        let output = transport.output();
        assert_eq!(output.clicks.len(), 4);
        assert!(stopped_at.unwrap() > output.clicks[0]);
        for pair in output.clicks.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(60));
        }
        let started = output.started.unwrap();
        assert!(started - output.clicks[3] >= Duration::from_millis(60));

        h.dispatcher.wait_idle().await;
    }
}
