//! Default audio probe for WAV payloads, backed by `hound`.

use super::{AudioMetadata, AudioProbe};
use std::io::Cursor;

/// Reads the WAV header. Anything hound cannot parse is unreadable.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavProbe;

impl AudioProbe for WavProbe {
    fn probe(&self, payload: &[u8]) -> Option<AudioMetadata> {
        let reader = hound::WavReader::new(Cursor::new(payload)).ok()?;
        let spec = reader.spec();
        if spec.sample_rate == 0 {
            return None;
        }
        Some(AudioMetadata {
            duration: f64::from(reader.duration()) / f64::from(spec.sample_rate),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }
}
