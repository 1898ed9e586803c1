use anyhow::{Context, Result};
use hound::WavReader;
use std::path::Path;
use tracing::{info, warn};

use super::format::AudioFormat;

/// Audio material replayed by every session bound to it.
///
/// WAV files are decoded to 16-bit little-endian PCM; any other file is
/// treated as already-encoded frames and sent byte for byte.
#[derive(Debug, Clone)]
pub struct AudioSource {
    pub path: String,
    pub format: AudioFormat,
    pub duration_ms: u64,
    data: Vec<u8>,
}

impl AudioSource {
    pub fn open(path: impl AsRef<Path>, format: AudioFormat) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio source: {}", path.display());

        let is_wav = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        let data = if is_wav {
            Self::read_wav(path, &format)?
        } else {
            std::fs::read(path)
                .with_context(|| format!("Failed to read audio file: {}", path.display()))?
        };

        let source = Self::from_bytes(path.display().to_string(), data, format);

        info!(
            "Audio source loaded: {} bytes, {}ms at {}Hz ({})",
            source.data.len(),
            source.duration_ms,
            format.sample_rate,
            format.encoding
        );

        Ok(source)
    }

    /// Build a source from bytes already in memory
    pub fn from_bytes(path: impl Into<String>, data: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            path: path.into(),
            duration_ms: format.duration_ms(data.len()),
            format,
            data,
        }
    }

    fn read_wav(path: &Path, format: &AudioFormat) -> Result<Vec<u8>> {
        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.sample_rate != format.sample_rate {
            warn!(
                "{} is {}Hz but sessions declare {}Hz",
                path.display(),
                spec.sample_rate,
                format.sample_rate
            );
        }
        if spec.channels != 1 {
            warn!("{} has {} channels, sending interleaved", path.display(), spec.channels);
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Split the source into send-sized frames; the last one may be short
    pub fn frames(&self, frame_bytes: usize) -> impl Iterator<Item = &[u8]> {
        self.data.chunks(frame_bytes.max(1))
    }

    /// Number of frames `frames(frame_bytes)` yields
    pub fn frame_count(&self, frame_bytes: usize) -> usize {
        let frame_bytes = frame_bytes.max(1);
        (self.data.len() + frame_bytes - 1) / frame_bytes
    }
}
