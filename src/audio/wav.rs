//! In-memory WAV framing for ASR uploads
//!
//! The speech service takes canonical RIFF PCM16 mono: a 44-byte header
//! followed by little-endian samples at the declared rate.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;

/// Wrap raw samples in a WAV container, entirely in memory.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            WavWriter::new(&mut cursor, spec).context("failed to start WAV writer")?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize().context("failed to finalize WAV data")?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_canonical_riff_pcm16_mono() {
        let wav = encode_wav(&[0i16; 160], 16_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 160 * 2);
        // sample rate field at offset 24, little-endian
        let rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(rate, 16_000);
        // channel count at offset 22
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 1);
    }

    #[test]
    fn samples_round_trip() {
        let samples = vec![0i16, 1000, -1000, i16::MAX, i16::MIN];
        let wav = encode_wav(&samples, 16_000).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, samples);
    }
}
