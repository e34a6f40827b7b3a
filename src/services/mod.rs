pub mod analysis;
pub mod recorder;
pub mod recording_loop;

pub use analysis::AnalysisDispatcher;
pub use recorder::Recorder;
pub use recording_loop::{RecordingLoop, SegmentSettings};
