pub mod artifact;
pub mod capture;
pub mod devices;
pub mod format;
pub mod output;

pub use capture::{CaptureEngine, CpalSource, InputSource, RecordingSession};
pub use devices::InputDevice;
pub use format::{AudioFormat, SampleFormat};
pub use output::{PlaybackOutput, RodioOutput, SilentOutput};
