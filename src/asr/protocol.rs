//! Wire format of the `/ws_asr` endpoint.
//!
//! Inbound: JSON text frames `{"text"?, "speaker"?, "options"?}`. A frame may
//! carry any subset; malformed frames are discarded by the caller.
//!
//! Outbound: binary frames, each one a complete little WAV file of 16 kHz
//! mono PCM16. The server transcodes every frame through ffmpeg, so each
//! chunk has to be self-describing rather than a bare sample dump.

use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Deserialize;
use std::io::Cursor;

use crate::session::OptionItem;

/// Sample rate the server's recognizer expects.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// One inbound frame from the transcription server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerFrame {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<OptionItem>>,
}

pub fn parse_frame(raw: &str) -> Result<ServerFrame, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Encode one chunk of mono PCM16 as a standalone WAV blob.
pub fn wav_chunk(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Downsample audio from source rate to target rate using simple averaging.
///
/// Only integer ratios are supported (48 kHz or 32 kHz → 16 kHz); other
/// ratios pass the input through unchanged.
pub fn downsample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate % target_rate != 0 {
        log::warn!(
            "unsupported resample ratio {}:{}, returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    let ratio = (source_rate / target_rate) as usize;

    samples
        .chunks(ratio)
        .map(|chunk| {
            // i64 keeps the sum safe for any chunk size
            let sum: i64 = chunk.iter().map(|&s| s as i64).sum();
            (sum / chunk.len() as i64) as i16
        })
        .collect()
}
