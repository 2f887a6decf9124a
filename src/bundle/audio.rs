//! Voice clip extraction from AssetBundles.
//!
//! Audio ships as FSB5 soundbanks inside `AudioClip` objects. A soundbank may
//! carry several samples; each becomes its own output clip. Clips land in a
//! per-character directory derived from the bundle filename and are numbered
//! `CN_<nnn>.<ext>` with a monotonic 3-digit counter.

use byteorder::{ByteOrder, LittleEndian};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use super::container::{Bundle, BundleObject};
use crate::error::{Result, SynthError};

/// Skin suffix on voice bundle stems, e.g. `char_383_snsant_boc#6`.
static SKIN_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_[a-z]+#\d+$").unwrap());

/// Character directory name for a voice bundle stem.
pub fn audio_folder_name(ab_stem: &str) -> String {
    SKIN_SUFFIX_RE.replace(ab_stem, "").into_owned()
}

/// One sample split out of an FSB5 soundbank.
#[derive(Debug, Clone)]
pub struct FsbSample {
    pub name: Option<String>,
    pub data: Vec<u8>,
}

/// Split an `AudioClip` payload into its samples.
///
/// FSB5 soundbanks are split per sample header; anything else is passed
/// through as a single unnamed blob.
pub fn split_samples(data: &[u8]) -> Result<Vec<FsbSample>> {
    if data.len() < 4 || &data[..4] != b"FSB5" {
        return Ok(vec![FsbSample {
            name: None,
            data: data.to_vec(),
        }]);
    }
    if data.len() < 60 {
        return Err(SynthError::Codec("malformed stream: truncated FSB5 header".into()));
    }

    let version = LittleEndian::read_u32(&data[4..8]);
    let num_samples = LittleEndian::read_u32(&data[8..12]) as usize;
    let sample_headers_size = LittleEndian::read_u32(&data[12..16]) as usize;
    let name_table_size = LittleEndian::read_u32(&data[16..20]) as usize;
    let data_size = LittleEndian::read_u32(&data[20..24]) as usize;
    let base_header_size = if version == 0 { 64 } else { 60 };

    let headers_start = base_header_size;
    let names_start = headers_start + sample_headers_size;
    let data_start = names_start + name_table_size;
    if data_start + data_size > data.len() || num_samples == 0 {
        return Err(SynthError::Codec("malformed stream: FSB5 sections out of bounds".into()));
    }

    // Sample headers: a 64-bit word per sample, optionally followed by extra
    // parameter chunks. Bits 6..34 hold the data offset in 32-byte units.
    let mut offsets = Vec::with_capacity(num_samples);
    let mut pos = headers_start;
    for _ in 0..num_samples {
        if pos + 8 > names_start {
            return Err(SynthError::Codec("malformed stream: truncated FSB5 sample header".into()));
        }
        let raw = LittleEndian::read_u64(&data[pos..pos + 8]);
        pos += 8;
        let mut has_extra = raw & 1 != 0;
        while has_extra {
            if pos + 4 > names_start {
                return Err(SynthError::Codec("malformed stream: truncated FSB5 chunk".into()));
            }
            let chunk = LittleEndian::read_u32(&data[pos..pos + 4]);
            pos += 4;
            has_extra = chunk & 1 != 0;
            pos += ((chunk >> 1) & 0x00FF_FFFF) as usize;
        }
        let offset = (((raw >> 6) & 0x0FFF_FFFF) as usize) * 32;
        offsets.push(offset);
    }

    // Optional name table: per-sample string offsets then zero-terminated names.
    let mut names: Vec<Option<String>> = vec![None; num_samples];
    if name_table_size > 0 {
        for (i, name_slot) in names.iter_mut().enumerate() {
            let slot = names_start + i * 4;
            if slot + 4 > data_start {
                break;
            }
            let rel = LittleEndian::read_u32(&data[slot..slot + 4]) as usize;
            let start = names_start + rel;
            if let Some(end) = data[start..data_start].iter().position(|&b| b == 0) {
                *name_slot = Some(String::from_utf8_lossy(&data[start..start + end]).into_owned());
            }
        }
    }

    let mut samples = Vec::with_capacity(num_samples);
    for i in 0..num_samples {
        let start = data_start + offsets[i];
        let end = if i + 1 < num_samples {
            data_start + offsets[i + 1]
        } else {
            data_start + data_size
        };
        if start > end || end > data.len() {
            return Err(SynthError::Codec("malformed stream: FSB5 sample range out of bounds".into()));
        }
        samples.push(FsbSample {
            name: names[i].clone(),
            data: data[start..end].to_vec(),
        });
    }
    Ok(samples)
}

/// Statistics from a voice-tree extraction run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStats {
    pub processed: usize,
    pub extracted: usize,
    pub failed: usize,
}

/// Extract every audio clip from one bundle into
/// `<output_dir>/<character>/CN_<nnn>.<ext>`.
pub fn extract_audio_from_bundle(
    ab_path: &Path,
    output_dir: &Path,
    output_format: &str,
) -> Result<Vec<PathBuf>> {
    let bundle = Bundle::open(ab_path)?;

    let stem = ab_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SynthError::InvalidInput(format!("bad bundle path {}", ab_path.display())))?;
    let char_dir = output_dir.join(audio_folder_name(stem));
    std::fs::create_dir_all(&char_dir)?;

    let mut extracted = Vec::new();
    let mut index = 1usize;
    for obj in bundle.objects()? {
        let BundleObject::Audio(clip) = obj else {
            continue;
        };
        let samples = match split_samples(&clip.data) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("skipping clip {:?} in {}: {e}", clip.name, ab_path.display());
                continue;
            }
        };
        for sample in samples {
            if sample.data.is_empty() {
                continue;
            }
            let out_path = char_dir.join(format!("CN_{index:03}.{output_format}"));
            std::fs::write(&out_path, &sample.data)?;
            extracted.push(out_path);
            index += 1;
        }
    }
    Ok(extracted)
}

/// Extract every `.ab` file in a directory. A failing bundle is counted and
/// skipped; the rest of the directory continues.
pub fn extract_voice_folder(
    source_dir: &Path,
    output_dir: &Path,
    output_format: &str,
) -> Result<ExtractStats> {
    let mut stats = ExtractStats::default();
    let mut ab_files: Vec<PathBuf> = std::fs::read_dir(source_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "ab"))
        .collect();
    ab_files.sort();

    let total = ab_files.len();
    for (i, ab_path) in ab_files.iter().enumerate() {
        info!("[{}/{total}] processing {}", i + 1, ab_path.display());
        match extract_audio_from_bundle(ab_path, output_dir, output_format) {
            Ok(files) => {
                stats.processed += 1;
                stats.extracted += files.len();
            }
            Err(e) => {
                warn!("failed to extract {}: {e}", ab_path.display());
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// Extract every voice language folder under the game's VoiceAssets tree.
pub fn extract_voice_tree(
    voice_assets_dir: &Path,
    output_dir: &Path,
    output_format: &str,
    languages: &[&str],
) -> Result<Vec<(String, ExtractStats)>> {
    let mut all = Vec::new();
    for lang in languages {
        let source = voice_assets_dir.join(lang);
        if !source.exists() {
            info!("skipping {lang}: directory not found");
            continue;
        }
        let stats = extract_voice_folder(&source, &output_dir.join(lang), output_format)?;
        info!(
            "{lang} complete: {} bundles, {} clips extracted, {} failed",
            stats.processed, stats.extracted, stats.failed
        );
        all.push(((*lang).to_owned(), stats));
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn folder_name_strips_skin_suffix() {
        assert_eq!(audio_folder_name("char_383_snsant_boc#6"), "char_383_snsant");
        assert_eq!(audio_folder_name("char_002_amiya_iteration#2"), "char_002_amiya");
        assert_eq!(audio_folder_name("char_002_amiya"), "char_002_amiya");
    }

    #[test]
    fn non_fsb_payload_is_one_blob() {
        let samples = split_samples(b"RIFFdata").unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].name.is_none());
        assert_eq!(samples[0].data, b"RIFFdata");
    }

    fn build_fsb5(sample_payloads: &[&[u8]]) -> Vec<u8> {
        // Payloads padded to 32-byte alignment so offsets are representable.
        let mut body = Vec::new();
        let mut offsets = Vec::new();
        for payload in sample_payloads {
            offsets.push(body.len());
            body.extend_from_slice(payload);
            while body.len() % 32 != 0 {
                body.push(0);
            }
        }

        let mut headers = Vec::new();
        for offset in &offsets {
            let raw: u64 = ((*offset as u64 / 32) << 6) | (1 << 34);
            headers.extend_from_slice(&raw.to_le_bytes());
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"FSB5");
        out.extend_from_slice(&1u32.to_le_bytes()); // version
        out.extend_from_slice(&(sample_payloads.len() as u32).to_le_bytes());
        out.extend_from_slice(&(headers.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // name table size
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // mode
        out.extend_from_slice(&[0u8; 32]); // zero + hash + dummy
        out.extend_from_slice(&headers);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn splits_multi_sample_soundbank() {
        let a = vec![1u8; 40];
        let b = vec![2u8; 10];
        let bank = build_fsb5(&[&a, &b]);
        let samples = split_samples(&bank).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(&samples[0].data[..40], &a[..]);
        assert_eq!(&samples[1].data[..10], &b[..]);
    }

    #[test]
    fn truncated_soundbank_is_malformed() {
        let mut bank = build_fsb5(&[&[1u8; 40]]);
        bank.truncate(50);
        assert!(split_samples(&bank).is_err());
    }
}
