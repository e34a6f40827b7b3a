use crate::audio::RecordingSession;
use crate::error::{CoreError, Result};
use crate::messages::{AnalysisEvent, AnalysisOutcome, Score};
use crate::pitch::PitchExtractor;
use futures::future::join_all;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Runs pitch analysis for finished takes on their own tasks
///
/// Every dispatched take produces exactly one `AnalysisEvent`, and both its
/// WAV and pitch-data artifacts are deleted whether analysis succeeds or not.
pub struct AnalysisDispatcher {
    extractor: Arc<dyn PitchExtractor>,
    events: mpsc::UnboundedSender<AnalysisEvent>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl AnalysisDispatcher {
    pub fn new(
        extractor: Arc<dyn PitchExtractor>,
        events: mpsc::UnboundedSender<AnalysisEvent>,
    ) -> Self {
        Self {
            extractor,
            events,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Hand a take off for analysis without waiting for it
    pub fn dispatch(&self, session: RecordingSession) {
        let extractor = self.extractor.clone();
        let events = self.events.clone();

        let handle = tokio::spawn(async move {
            let sequence = session.sequence;
            let outcome = match analyze(extractor.as_ref(), session).await {
                Ok(score) => {
                    tracing::info!("Take {} scored {}", sequence, score);
                    AnalysisOutcome::Scored(score)
                }
                Err(e) => {
                    tracing::error!("Take {} analysis failed: {}", sequence, e);
                    AnalysisOutcome::Failed(e.to_string())
                }
            };

            if events.send(AnalysisEvent { sequence, outcome }).is_err() {
                tracing::debug!("No listener for take {} result", sequence);
            }
        });

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Wait for every analysis dispatched so far
    pub async fn wait_idle(&self) {
        let handles = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *in_flight)
        };

        for result in join_all(handles).await {
            if let Err(e) = result {
                tracing::error!("Analysis task failed: {}", e);
            }
        }
    }
}

/// Extract pitches from a take, score them, and delete both artifacts
pub async fn analyze(extractor: &dyn PitchExtractor, session: RecordingSession) -> Result<Score> {
    let RecordingSession {
        sequence, artifact, ..
    } = session;

    let result = match extractor.extract(&artifact).await {
        Ok(pitch_path) => {
            let score = score_pitches(&pitch_path);
            remove_pitch_data(&pitch_path).await;
            Ok(score)
        }
        Err(e) => Err(CoreError::Analysis(format!("{:#}", e))),
    };

    let take_path = artifact.to_path_buf();
    match artifact.close() {
        Ok(()) => tracing::debug!("Deleted take {} at {:?}", sequence, take_path),
        Err(e) => tracing::warn!("Failed to delete take {:?}: {}", take_path, e),
    }

    result
}

// No comparison against the reference track exists yet
fn score_pitches(_pitch_path: &Path) -> Score {
    Score::PLACEHOLDER
}

async fn remove_pitch_data(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!("Failed to delete pitch data {:?}: {}", path, e);
    }
}
