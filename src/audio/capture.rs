use super::artifact;
use super::devices::{self, InputDevice};
use super::format::{AudioFormat, SampleFormat};
use crate::error::{CoreError, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, FromSample, Sample, SampleRate, SizedSample, StreamConfig};
use ringbuf::{HeapCons, HeapProd, HeapRb, traits::*};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempPath;

/// How long past the requested duration a capture may run before the device
/// is considered stalled.
const STALL_GRACE: Duration = Duration::from_secs(2);

/// Something that can fill a buffer with live input audio.
///
/// `record` blocks for the whole take and returns exactly
/// `frames * format.channels` interleaved samples normalised to `f32`.
pub trait InputSource: Send + Sync {
    /// Input-capable devices on the primary host, in enumeration order
    fn input_devices(&self) -> Result<Vec<InputDevice>>;

    /// Check that the device exists and accepts the format, without recording
    fn probe(&self, device: &InputDevice, format: AudioFormat) -> Result<()>;

    fn record(&self, device: &InputDevice, format: AudioFormat, frames: usize) -> Result<Vec<f32>>;
}

/// A finished take, owned by whoever is going to analyse it.
///
/// The WAV artifact is deleted when `artifact` is closed or dropped.
#[derive(Debug)]
pub struct RecordingSession {
    pub sequence: u64,
    pub device: InputDevice,
    pub duration: Duration,
    pub format: AudioFormat,
    pub samples: Vec<f32>,
    pub artifact: TempPath,
}

/// Records fixed-length takes and persists each one as a temporary WAV
pub struct CaptureEngine {
    source: Arc<dyn InputSource>,
    artifact_dir: PathBuf,
}

impl CaptureEngine {
    pub fn new(source: Arc<dyn InputSource>) -> Self {
        Self::with_artifact_dir(source, std::env::temp_dir())
    }

    pub fn with_artifact_dir(source: Arc<dyn InputSource>, artifact_dir: PathBuf) -> Self {
        Self {
            source,
            artifact_dir,
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn input_devices(&self) -> Result<Vec<InputDevice>> {
        self.source.input_devices()
    }

    /// The device at `position` in the filtered input list
    pub fn select_device(&self, position: usize) -> Result<InputDevice> {
        self.input_devices()?
            .into_iter()
            .nth(position)
            .ok_or_else(|| CoreError::unavailable(position, "no input device at that position"))
    }

    pub fn probe(&self, device: &InputDevice, format: AudioFormat) -> Result<()> {
        self.source.probe(device, format)
    }

    /// Capture `duration_secs` of audio, blocking the caller for the whole take
    pub fn capture(
        &self,
        sequence: u64,
        device: &InputDevice,
        duration_secs: f64,
        format: AudioFormat,
    ) -> Result<RecordingSession> {
        tracing::info!(
            "Recording {:.1}s of input audio from {} ({})",
            duration_secs,
            device.name,
            format
        );

        let frames = format.frames_for_duration(duration_secs);
        let samples = self.source.record(device, format, frames)?;

        let expected = frames * format.channels as usize;
        if samples.len() != expected {
            return Err(CoreError::unavailable(
                device.index,
                format!("short read: {} of {} samples", samples.len(), expected),
            ));
        }

        let artifact = artifact::write_take(&self.artifact_dir, format, &samples)?;
        tracing::debug!("Take {} saved to {:?}", sequence, artifact);

        Ok(RecordingSession {
            sequence,
            device: device.clone(),
            duration: Duration::from_secs_f64(duration_secs.max(0.0)),
            format,
            samples,
            artifact,
        })
    }
}

/// Callback-side writer for one take.
///
/// Converts incoming samples to `f32` and stores them until the take is full.
/// Anything past the end of the take is discarded, and completion is signalled
/// exactly once.
pub(crate) struct TakeWriter {
    producer: HeapProd<f32>,
    done: Option<SyncSender<()>>,
}

impl TakeWriter {
    /// Returns true once the take is complete
    pub fn push<T>(&mut self, data: &[T]) -> bool
    where
        T: Sample,
        f32: FromSample<T>,
    {
        if self.done.is_none() {
            return true;
        }

        self.producer
            .push_iter(data.iter().map(|&s| s.to_sample::<f32>()));

        if self.producer.is_full() {
            if let Some(tx) = self.done.take() {
                let _ = tx.try_send(());
            }
            true
        } else {
            false
        }
    }
}

/// Allocate room for exactly `total` samples
pub(crate) fn take_buffer(total: usize) -> (TakeWriter, HeapCons<f32>, Receiver<()>) {
    let (producer, consumer) = HeapRb::<f32>::new(total.max(1)).split();
    let (done_tx, done_rx) = sync_channel(1);
    let writer = TakeWriter {
        producer,
        done: Some(done_tx),
    };
    (writer, consumer, done_rx)
}

/// Block until the take is full, the writer goes away, or the device stalls
pub(crate) fn wait_for_take(
    done: &Receiver<()>,
    frames: usize,
    sample_rate: u32,
) -> std::result::Result<(), RecvTimeoutError> {
    let expected = Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64);
    done.recv_timeout(expected + STALL_GRACE)
}

/// Remembers the handle resolved for the armed device and format, so takes
/// after the first skip host enumeration.
pub(crate) struct DeviceCache<H> {
    resolved: Mutex<Option<(InputDevice, AudioFormat, H)>>,
}

impl<H: Clone> DeviceCache<H> {
    pub fn new() -> Self {
        Self {
            resolved: Mutex::new(None),
        }
    }

    pub fn get_or_resolve(
        &self,
        device: &InputDevice,
        format: AudioFormat,
        resolve: impl FnOnce() -> Result<H>,
    ) -> Result<H> {
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((cached, cached_format, handle)) = resolved.as_ref() {
            if cached == device && *cached_format == format {
                return Ok(handle.clone());
            }
        }

        let handle = resolve()?;
        *resolved = Some((device.clone(), format, handle.clone()));
        Ok(handle)
    }

    /// Drop the cached handle so the next take resolves the device again
    pub fn forget(&self) {
        *self.resolved.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Input source backed by the platform audio host
pub struct CpalSource {
    devices: DeviceCache<cpal::Device>,
}

impl CpalSource {
    pub fn new() -> Self {
        Self {
            devices: DeviceCache::new(),
        }
    }

    fn ensure_supported(
        handle: &cpal::Device,
        device: &InputDevice,
        format: AudioFormat,
    ) -> Result<()> {
        let mut configs = handle
            .supported_input_configs()
            .map_err(|e| CoreError::unavailable(device.index, e))?;

        let supported = configs.any(|c| {
            c.channels() == format.channels
                && c.sample_format() == format.sample_format.to_cpal()
                && c.min_sample_rate().0 <= format.sample_rate
                && format.sample_rate <= c.max_sample_rate().0
        });

        if supported {
            Ok(())
        } else {
            Err(CoreError::UnsupportedFormat {
                index: device.index,
                format,
            })
        }
    }

    fn handle(&self, device: &InputDevice, format: AudioFormat) -> Result<cpal::Device> {
        self.devices.get_or_resolve(device, format, || {
            let handle = devices::resolve(device)?;
            Self::ensure_supported(&handle, device, format)?;
            Ok(handle)
        })
    }

    fn build_stream<T>(
        handle: &cpal::Device,
        device: &InputDevice,
        format: AudioFormat,
        mut writer: TakeWriter,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: BufferSize::Default,
        };

        handle
            .build_input_stream(
                &config,
                move |data: &[T], _info: &cpal::InputCallbackInfo| {
                    writer.push(data);
                },
                move |err| {
                    tracing::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::StreamConfigNotSupported => CoreError::UnsupportedFormat {
                    index: device.index,
                    format,
                },
                other => CoreError::unavailable(device.index, other),
            })
    }

    fn record_with(
        &self,
        handle: &cpal::Device,
        device: &InputDevice,
        format: AudioFormat,
        frames: usize,
    ) -> Result<Vec<f32>> {
        let total = frames * format.channels as usize;
        if total == 0 {
            return Ok(Vec::new());
        }

        let (writer, mut consumer, done) = take_buffer(total);

        let stream = match format.sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(handle, device, format, writer)?,
            SampleFormat::I16 => Self::build_stream::<i16>(handle, device, format, writer)?,
        };

        stream
            .play()
            .map_err(|e| CoreError::unavailable(device.index, e))?;

        let waited = wait_for_take(&done, frames, format.sample_rate);

        // Dropping the stream releases the device
        drop(stream);

        waited.map_err(|_| CoreError::unavailable(device.index, "device stopped delivering audio"))?;

        let mut samples = vec![0.0f32; total];
        let n = consumer.pop_slice(&mut samples);
        samples.truncate(n);

        tracing::debug!("Captured {} samples from {}", n, device.name);
        Ok(samples)
    }
}

impl Default for CpalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for CpalSource {
    fn input_devices(&self) -> Result<Vec<InputDevice>> {
        devices::list_input_devices()
    }

    fn probe(&self, device: &InputDevice, format: AudioFormat) -> Result<()> {
        self.handle(device, format).map(|_| ())
    }

    fn record(&self, device: &InputDevice, format: AudioFormat, frames: usize) -> Result<Vec<f32>> {
        let handle = self.handle(device, format)?;

        let recorded = self.record_with(&handle, device, format, frames);
        if recorded.is_err() {
            // Unplugged or replaced devices get looked up again next take
            self.devices.forget();
        }
        recorded
    }
}
