//! WAV assembly and audio duration probing.
//!
//! The synthesis runtime returns one WAV per text segment; segments are
//! stitched back together here, with optional silence gaps between them.
//! Reference clips are probed format-aware: WAV through `hound`, everything
//! else through `symphonia`. A clip whose duration cannot be determined
//! reports `None` and is excluded from reference selection.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, SynthError};

/// Raw frames of one decoded WAV chunk.
enum Frames {
    Int16(Vec<i16>),
    Float32(Vec<f32>),
}

fn read_wav(data: &[u8]) -> Result<(WavSpec, Frames)> {
    let reader = WavReader::new(Cursor::new(data))
        .map_err(|e| SynthError::Tts(format!("bad WAV chunk: {e}")))?;
    let spec = reader.spec();
    let frames = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => {
            let samples: std::result::Result<Vec<i16>, _> = reader.into_samples().collect();
            Frames::Int16(samples.map_err(|e| SynthError::Tts(format!("bad WAV samples: {e}")))?)
        }
        (SampleFormat::Float, 32) => {
            let samples: std::result::Result<Vec<f32>, _> = reader.into_samples().collect();
            Frames::Float32(samples.map_err(|e| SynthError::Tts(format!("bad WAV samples: {e}")))?)
        }
        (format, bits) => {
            return Err(SynthError::Tts(format!(
                "unsupported WAV encoding: {format:?}/{bits}-bit"
            )));
        }
    };
    Ok((spec, frames))
}

/// Concatenate WAV chunks into one file, inserting `pauses_ms[i]` of silence
/// after chunk `i`. All chunks must share the first chunk's PCM parameters.
pub fn concatenate_wav(chunks: &[Vec<u8>], pauses_ms: &[u32]) -> Result<Vec<u8>> {
    let Some(first) = chunks.first() else {
        return Err(SynthError::Tts("no audio chunks to concatenate".into()));
    };
    if chunks.len() == 1 {
        return Ok(first.clone());
    }

    let (spec, _) = read_wav(first)?;
    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut out, spec)
            .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
        for (i, chunk) in chunks.iter().enumerate() {
            let (chunk_spec, frames) = read_wav(chunk)?;
            if chunk_spec != spec {
                return Err(SynthError::Tts(format!(
                    "segment {i} PCM parameters differ from the first segment"
                )));
            }
            match frames {
                Frames::Int16(samples) => {
                    for sample in samples {
                        writer
                            .write_sample(sample)
                            .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
                    }
                }
                Frames::Float32(samples) => {
                    for sample in samples {
                        writer
                            .write_sample(sample)
                            .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
                    }
                }
            }

            // Silence gap after this segment, none after the last.
            if i + 1 < chunks.len() {
                let pause = pauses_ms.get(i).copied().unwrap_or(0);
                let silent_frames =
                    (u64::from(spec.sample_rate) * u64::from(pause) / 1000) as usize;
                for _ in 0..silent_frames * usize::from(spec.channels) {
                    match spec.sample_format {
                        SampleFormat::Int => writer.write_sample(0i16),
                        SampleFormat::Float => writer.write_sample(0.0f32),
                    }
                    .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
                }
            }
        }
        writer
            .finalize()
            .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
    }
    Ok(out.into_inner())
}

/// Prepend silence to a WAV payload (protects against playback devices that
/// swallow the first milliseconds while waking up).
pub fn add_silence_padding(wav_data: &[u8], silence_ms: u32) -> Result<Vec<u8>> {
    let (spec, frames) = read_wav(wav_data)?;
    let silent_frames = (u64::from(spec.sample_rate) * u64::from(silence_ms) / 1000) as usize;

    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut out, spec)
            .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
        let pad = silent_frames * usize::from(spec.channels);
        match frames {
            Frames::Int16(samples) => {
                for _ in 0..pad {
                    writer
                        .write_sample(0i16)
                        .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
                }
                for sample in samples {
                    writer
                        .write_sample(sample)
                        .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
                }
            }
            Frames::Float32(samples) => {
                for _ in 0..pad {
                    writer
                        .write_sample(0.0f32)
                        .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
                }
                for sample in samples {
                    writer
                        .write_sample(sample)
                        .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
                }
            }
        }
        writer
            .finalize()
            .map_err(|e| SynthError::Tts(format!("WAV write failed: {e}")))?;
    }
    Ok(out.into_inner())
}

/// Duration in seconds of an in-memory WAV payload.
pub fn wav_duration(data: &[u8]) -> Option<f64> {
    let reader = WavReader::new(Cursor::new(data)).ok()?;
    let spec = reader.spec();
    Some(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

/// Duration in seconds of an audio file, probed format-aware.
///
/// Returns `None` when no decoder recognizes the file or the container does
/// not declare enough to compute a duration.
pub fn audio_duration(path: &Path) -> Option<f64> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext.eq_ignore_ascii_case("wav") {
        if let Ok(reader) = WavReader::open(path) {
            let spec = reader.spec();
            return Some(f64::from(reader.duration()) / f64::from(spec.sample_rate));
        }
        // Mislabeled files fall through to the generic probe.
    }
    symphonia_duration(path)
}

fn symphonia_duration(path: &Path) -> Option<f64> {
    let file = std::fs::File::open(path).ok()?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;
    let mut format = probed.format;
    let (n_frames, sample_rate, time_base, track_id) = {
        let track = format.default_track()?;
        let params = &track.codec_params;
        (params.n_frames, params.sample_rate, params.time_base, track.id)
    };

    if let (Some(n_frames), Some(rate)) = (n_frames, sample_rate) {
        return Some(n_frames as f64 / f64::from(rate));
    }

    // Containers without a frame count (bare MP3 streams): walk the packets.
    let time_base = time_base?;
    let mut total_ts = 0u64;
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() == track_id {
            total_ts += packet.dur();
        }
    }
    if total_ts == 0 {
        return None;
    }
    let time = time_base.calc_time(total_ts);
    Some(time.seconds as f64 + time.frac)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn tone_wav(seconds: f64, sample_rate: u32, value: i16) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut out, spec).unwrap();
            for _ in 0..(seconds * f64::from(sample_rate)) as usize {
                writer.write_sample(value).unwrap();
            }
            writer.finalize().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn concatenation_sums_durations_and_gaps() {
        let a = tone_wav(1.0, 16_000, 100);
        let b = tone_wav(0.5, 16_000, -100);
        let joined = concatenate_wav(&[a, b], &[250]).unwrap();
        let duration = wav_duration(&joined).unwrap();
        assert!((duration - 1.75).abs() < 0.01, "got {duration}");
    }

    #[test]
    fn single_chunk_passes_through() {
        let a = tone_wav(0.3, 16_000, 5);
        let joined = concatenate_wav(&[a.clone()], &[]).unwrap();
        assert_eq!(joined, a);
    }

    #[test]
    fn mismatched_pcm_parameters_fail() {
        let a = tone_wav(0.2, 16_000, 1);
        let b = tone_wav(0.2, 32_000, 1);
        assert!(concatenate_wav(&[a, b], &[0]).is_err());
    }

    #[test]
    fn empty_chunk_list_fails() {
        assert!(concatenate_wav(&[], &[]).is_err());
    }

    #[test]
    fn padding_prepends_silence() {
        let a = tone_wav(1.0, 16_000, 7);
        let padded = add_silence_padding(&a, 150).unwrap();
        let duration = wav_duration(&padded).unwrap();
        assert!((duration - 1.15).abs() < 0.01);

        // The padding really is silence.
        let reader = WavReader::new(Cursor::new(padded.as_slice())).unwrap();
        let first: Vec<i16> = reader
            .into_samples()
            .take(100)
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert!(first.iter().all(|&s| s == 0));
    }

    #[test]
    fn probes_wav_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, tone_wav(2.0, 22_050, 3)).unwrap();
        let duration = audio_duration(&path).unwrap();
        assert!((duration - 2.0).abs() < 0.01);
    }

    #[test]
    fn unreadable_file_probes_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_audio.mp3");
        std::fs::write(&path, b"this is not audio data at all").unwrap();
        assert!(audio_duration(&path).is_none());
    }
}
