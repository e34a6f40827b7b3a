use super::analysis::AnalysisDispatcher;
use crate::audio::{AudioFormat, CaptureEngine, InputDevice};
use crate::error::{CoreError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSettings {
    pub device: InputDevice,
    pub duration_secs: f64,
    pub format: AudioFormat,
}

/// Repeatedly captures fixed-length takes while armed
///
/// Each take is captured on a blocking thread and awaited, so captures never
/// overlap; its analysis is dispatched without waiting. The armed flag is
/// checked once per iteration, so an in-flight capture always completes.
/// After every take the loop rests for one segment length, cut short by `stop`.
pub struct RecordingLoop {
    engine: Arc<CaptureEngine>,
    dispatcher: Arc<AnalysisDispatcher>,
    settings: SegmentSettings,
    armed: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl RecordingLoop {
    pub fn new(
        engine: Arc<CaptureEngine>,
        dispatcher: Arc<AnalysisDispatcher>,
        settings: SegmentSettings,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            settings,
            armed: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            task: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &SegmentSettings {
        &self.settings
    }

    /// Arm the loop. Fails without arming if the device or format is unusable.
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            tracing::debug!("Recording loop already running");
            return Ok(());
        }

        let probe = {
            let engine = self.engine.clone();
            let settings = self.settings.clone();
            tokio::task::spawn_blocking(move || engine.probe(&settings.device, settings.format))
        };
        probe
            .await
            .map_err(|e| CoreError::unavailable(self.settings.device.index, e))??;

        self.armed.store(true, Ordering::SeqCst);
        self.wake = Arc::new(Notify::new());

        self.task = Some(tokio::spawn(run(
            self.engine.clone(),
            self.dispatcher.clone(),
            self.settings.clone(),
            self.armed.clone(),
            self.wake.clone(),
        )));

        tracing::info!(
            "Recording loop armed on {} ({:.1}s takes)",
            self.settings.device.name,
            self.settings.duration_secs
        );
        Ok(())
    }

    /// Disarm and wait for the loop task to exit.
    ///
    /// Once this returns no further capture starts; analyses already
    /// dispatched may still be finishing.
    pub async fn stop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        self.wake.notify_one();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Recording loop task failed: {}", e);
            }
            tracing::info!("Recording loop stopped");
        }
    }
}

impl Drop for RecordingLoop {
    fn drop(&mut self) {
        self.armed.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }
}

async fn run(
    engine: Arc<CaptureEngine>,
    dispatcher: Arc<AnalysisDispatcher>,
    settings: SegmentSettings,
    armed: Arc<AtomicBool>,
    wake: Arc<Notify>,
) {
    let rest = Duration::from_secs_f64(settings.duration_secs);
    let mut sequence = 0u64;

    while armed.load(Ordering::SeqCst) {
        sequence += 1;

        let capture = {
            let engine = engine.clone();
            let settings = settings.clone();
            tokio::task::spawn_blocking(move || {
                engine.capture(
                    sequence,
                    &settings.device,
                    settings.duration_secs,
                    settings.format,
                )
            })
        };

        match capture.await {
            Ok(Ok(session)) => dispatcher.dispatch(session),
            Ok(Err(e)) => tracing::warn!("Take {} capture failed: {}", sequence, e),
            Err(e) => tracing::error!("Take {} capture task failed: {}", sequence, e),
        }

        tokio::select! {
            _ = tokio::time::sleep(rest) => {}
            _ = wake.notified() => {}
        }
    }

    tracing::debug!("Recording loop exiting after {} takes", sequence);
}
