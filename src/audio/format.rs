use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Sample width of every source the driver feeds (16-bit mono PCM)
const BYTES_PER_SAMPLE: u32 = 2;

/// Encoding the transport is asked to apply to outgoing frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    /// Raw 16-bit PCM, sent as-is
    Pcm,
    /// Opus in Ogg framing
    Opus,
    /// Bare Opus packets
    Opu,
}

impl AudioEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioEncoding::Pcm => "pcm",
            AudioEncoding::Opus => "opus",
            AudioEncoding::Opu => "opu",
        }
    }

    /// Frame duration the service expects per send call.
    ///
    /// Opus encoders on the service side only accept 20 ms PCM frames,
    /// raw PCM is pushed in 100 ms blocks.
    pub fn frame_duration_ms(&self) -> u32 {
        match self {
            AudioEncoding::Pcm => 100,
            AudioEncoding::Opus | AudioEncoding::Opu => 20,
        }
    }
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio parameters shared by pacing, frame sizing and duration accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
    /// Ratio between the PCM byte count and the bytes actually handed over
    /// (1 for uncompressed data, e.g. 10 for 10:1 Opus)
    pub compression_ratio: u32,
}

impl AudioFormat {
    pub fn new(encoding: AudioEncoding, sample_rate: u32) -> Self {
        Self {
            encoding,
            sample_rate,
            compression_ratio: 1,
        }
    }

    /// PCM bytes per millisecond of audio at this sample rate
    pub fn bytes_per_ms(&self) -> u32 {
        (self.sample_rate * BYTES_PER_SAMPLE / 1000).max(1)
    }

    /// Default number of bytes per send call for this encoding
    pub fn default_frame_bytes(&self) -> usize {
        (self.bytes_per_ms() * self.encoding.frame_duration_ms()) as usize
    }

    /// Milliseconds of audio represented by `bytes`
    pub fn duration_ms(&self, bytes: usize) -> u64 {
        bytes as u64 * self.compression_ratio as u64 / self.bytes_per_ms() as u64
    }

    /// Real-time pacing delay for a frame of `bytes` bytes.
    ///
    /// Always computed from the number of bytes handed to the transport;
    /// the value a transport returns from a send is not a byte count.
    pub fn pacing_delay(&self, bytes: usize) -> Duration {
        Duration::from_millis(self.duration_ms(bytes))
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(AudioEncoding::Pcm, 16000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes_follow_encoding() {
        assert_eq!(AudioFormat::new(AudioEncoding::Pcm, 16000).default_frame_bytes(), 3200);
        assert_eq!(AudioFormat::new(AudioEncoding::Opus, 16000).default_frame_bytes(), 640);
        assert_eq!(AudioFormat::new(AudioEncoding::Opu, 8000).default_frame_bytes(), 320);
    }

    #[test]
    fn test_pacing_matches_real_time() {
        let format = AudioFormat::new(AudioEncoding::Pcm, 16000);
        assert_eq!(format.pacing_delay(3200), Duration::from_millis(100));
        assert_eq!(format.pacing_delay(640), Duration::from_millis(20));

        let compressed = AudioFormat {
            compression_ratio: 10,
            ..AudioFormat::new(AudioEncoding::Opus, 16000)
        };
        assert_eq!(compressed.pacing_delay(64), Duration::from_millis(20));
    }

    #[test]
    fn test_duration_at_8khz() {
        let format = AudioFormat::new(AudioEncoding::Pcm, 8000);
        assert_eq!(format.bytes_per_ms(), 16);
        assert_eq!(format.duration_ms(16_000), 1000);
    }
}
