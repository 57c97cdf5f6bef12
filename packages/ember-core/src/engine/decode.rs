//! Decoding downloaded audio files to the canonical PCM form.
//!
//! Pipeline: symphonia probe → packet decode to interleaved f32 → downmix
//! to mono → resample to 44.1 kHz when needed → signed 16-bit LE bytes.

use std::fs::File;
use std::path::Path;

use bytes::Bytes;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::EngineError;
use crate::protocol::SAMPLE_RATE;

/// Decodes the file at `path` into canonical 16-bit LE mono 44.1 kHz PCM.
pub fn decode_to_canonical(path: &Path) -> Result<Bytes, EngineError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| EngineError::Probe(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(EngineError::NoAudioTrack)?;

    let track_id = track.id;
    let src_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| EngineError::Probe("source sample rate unknown".into()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(2)
        .max(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| EngineError::Decode(e.to_string()))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break, // EOF
            Err(e) => return Err(EngineError::Decode(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Recoverable corruption in a single packet, keep going
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(EngineError::Decode(e.to_string())),
        };

        if sample_buf.is_none() {
            sample_buf = Some(SampleBuffer::<f32>::new(
                decoded.capacity() as u64,
                *decoded.spec(),
            ));
        }
        if let Some(buf) = &mut sample_buf {
            buf.copy_interleaved_ref(decoded);
            interleaved.extend_from_slice(buf.samples());
        }
    }

    let mono = downmix_mono(&interleaved, channels);
    let mono = if src_rate == SAMPLE_RATE {
        mono
    } else {
        resample_mono(&mono, src_rate, SAMPLE_RATE)?
    };

    let mut pcm = Vec::with_capacity(mono.len() * 2);
    for &sample in &mono {
        let clamped = (sample * 32767.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        pcm.extend_from_slice(&clamped.to_le_bytes());
    }

    Ok(Bytes::from(pcm))
}

/// Averages interleaved frames down to a single channel.
fn downmix_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Offline sample-rate conversion of a mono buffer.
fn resample_mono(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, EngineError> {
    let ratio = to_rate as f64 / from_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Cubic,
        window: WindowFunction::BlackmanHarris2,
    };
    let chunk = 1024;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| EngineError::Resample(e.to_string()))?;

    let mut out = Vec::with_capacity((samples.len() as f64 * ratio) as usize + chunk);
    let mut pos = 0;
    while samples.len() - pos >= chunk {
        let frames = resampler
            .process(&[&samples[pos..pos + chunk]], None)
            .map_err(|e| EngineError::Resample(e.to_string()))?;
        out.extend_from_slice(&frames[0]);
        pos += chunk;
    }
    if pos < samples.len() {
        let frames = resampler
            .process_partial(Some(&[&samples[pos..]]), None)
            .map_err(|e| EngineError::Resample(e.to_string()))?;
        out.extend_from_slice(&frames[0]);
    }
    Ok(out)
}
