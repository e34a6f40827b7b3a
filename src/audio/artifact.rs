use super::format::{AudioFormat, SampleFormat};
use crate::error::{CoreError, Result};
use hound::WavWriter;
use std::io;
use std::path::Path;
use tempfile::TempPath;

/// Persist a captured take as a uniquely named temporary WAV file
///
/// The returned `TempPath` owns the file: dropping it deletes the file, and
/// `TempPath::close` deletes it while reporting errors.
pub fn write_take(dir: &Path, format: AudioFormat, samples: &[f32]) -> Result<TempPath> {
    let temp_file = tempfile::Builder::new()
        .prefix("rehearsal-take-")
        .suffix(".wav")
        .tempfile_in(dir)
        .map_err(|e| CoreError::artifact(dir, e))?;

    let path = temp_file.into_temp_path();

    let mut writer =
        WavWriter::create(&path, format.wav_spec()).map_err(|e| wav_error(&path, e))?;

    match format.sample_format {
        SampleFormat::F32 => {
            for &sample in samples {
                writer.write_sample(sample).map_err(|e| wav_error(&path, e))?;
            }
        }
        SampleFormat::I16 => {
            for &sample in samples {
                // Convert f32 (-1.0 to 1.0) to i16
                let amplitude = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer
                    .write_sample(amplitude)
                    .map_err(|e| wav_error(&path, e))?;
            }
        }
    }

    writer.finalize().map_err(|e| wav_error(&path, e))?;

    tracing::debug!("Wrote {} samples to {:?}", samples.len(), path);
    Ok(path)
}

fn wav_error(path: &Path, e: hound::Error) -> CoreError {
    let source = match e {
        hound::Error::IoError(io) => io,
        other => io::Error::other(other),
    };
    CoreError::artifact(path, source)
}
