//! Reference clip scoring and selection.
//!
//! A character's model directory holds preprocessed reference clips and an
//! `info.json` sidecar describing them. Given the text about to be
//! synthesized, the selector picks the conditioning clip(s): naturally paced,
//! context-neutral lines score high; combat barks are excluded outright.
//! The selector is a pure function of the directory's current contents.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

use crate::tts::wav::audio_duration;

/// Reference texts shorter than this extract poor voice characteristics.
pub const MIN_REF_TEXT_LENGTH: usize = 10;

/// Reference texts longer than this bleed into the synthesized output.
pub const MAX_REF_TEXT_LENGTH: usize = 30;

/// Voice title priorities. Naturally paced conversational lines first.
static TITLE_PRIORITY: LazyLock<HashMap<&'static str, i64>> = LazyLock::new(|| {
    HashMap::from([
        ("신뢰도 터치", 100),
        ("팀장 임명", 95),
        ("팀 배치", 90),
        ("어시스턴트 임명", 85),
        ("인사", 80),
        ("터치", 75),
        ("대화 1", 70),
        ("대화 2", 70),
        ("대화 3", 70),
        ("신뢰도 상승 후 대화 1", 65),
        ("신뢰도 상승 후 대화 2", 65),
        ("신뢰도 상승 후 대화 3", 65),
        ("1차 정예화 후 대화", 60),
        ("2차 정예화 후 대화", 60),
        ("오퍼레이터 입사", 55),
        ("시설에 배치", 40),
        ("타이틀", 30),
    ])
});

/// Combat/operational titles: short, shouted, unusable as conditioning input.
static EXCLUDED_TITLES: LazyLock<std::collections::HashSet<&'static str>> = LazyLock::new(|| {
    std::collections::HashSet::from([
        "작전 실패",
        "작전 개시",
        "작전 출발",
        "작전 중 1",
        "작전 중 2",
        "작전 중 3",
        "작전 중 4",
        "작전 중",
        "배치 1",
        "배치 2",
        "오퍼레이터 선택 1",
        "오퍼레이터 선택 2",
        "3★ 작전 종료",
        "비 3★ 작전 종료",
        "고난이도 작전 종료",
        "1차 정예화 (승진)",
        "2차 정예화 (승진)",
        "작전기록 학습",
        "방치",
    ])
});

/// Priority of a voice title, default 10 for unknown titles.
pub fn title_priority(title: &str) -> i64 {
    TITLE_PRIORITY.get(title).copied().unwrap_or(10)
}

/// Whether a clip is excluded from selection entirely.
pub fn is_excluded(title: &str, text: &str) -> bool {
    EXCLUDED_TITLES.contains(title) || text.chars().count() < MIN_REF_TEXT_LENGTH
}

/// Score a reference clip. Returns `(score, duration_in_range)`.
pub fn reference_score(
    title: &str,
    text_len: usize,
    duration: f64,
    min_duration: f64,
    max_duration: f64,
) -> (i64, bool) {
    let priority = title_priority(title);
    let valid_duration = (min_duration..=max_duration).contains(&duration);
    let duration_bonus = if valid_duration { 50 } else { 0 };
    let text_bonus = (text_len.min(40) / 2) as i64;
    let short_penalty = (MIN_REF_TEXT_LENGTH.saturating_sub(text_len) * 20) as i64;
    let long_penalty = (text_len.saturating_sub(MAX_REF_TEXT_LENGTH) * 15) as i64;

    let score = priority + duration_bonus + text_bonus - short_penalty - long_penalty;
    (score, valid_duration)
}

/// Score a clip for ICL-mode engines, which condition on one representative
/// clip: title and duration only, with the sweet spot around 9.5 seconds.
pub fn icl_reference_score(
    title: &str,
    duration: f64,
    optimal_min: f64,
    optimal_max: f64,
) -> (i64, bool) {
    let priority = title_priority(title);
    let is_optimal = (optimal_min..=optimal_max).contains(&duration);
    let is_acceptable = (3.0..=20.0).contains(&duration);

    let duration_bonus = if is_optimal {
        50
    } else if is_acceptable {
        25
    } else {
        0
    };
    let precision_bonus = if is_acceptable {
        (20.0 - (duration - 9.5).abs() * 2.0).max(0.0) as i64
    } else {
        0
    };

    (priority + duration_bonus + precision_bonus, is_optimal)
}

/// One descriptor row in `info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefClipDescriptor {
    /// Audio path relative to the model directory.
    pub audio: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub text_len: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RefInfoDoc {
    #[serde(default)]
    ref_audios: Vec<RefClipDescriptor>,
}

/// A selected reference clip.
#[derive(Debug, Clone)]
pub struct ReferenceClip {
    pub audio_path: PathBuf,
    pub text: String,
    pub score: i64,
    pub duration: f64,
}

/// Selects reference clips from one character's model directory.
pub struct ReferenceSelector {
    model_dir: PathBuf,
    min_duration: f64,
    max_duration: f64,
}

struct Candidate {
    audio_path: PathBuf,
    text: String,
    title: String,
    base_score: i64,
    text_len: usize,
    duration: f64,
}

impl ReferenceSelector {
    pub fn new(model_dir: impl Into<PathBuf>, min_duration: f64, max_duration: f64) -> Self {
        Self {
            model_dir: model_dir.into(),
            min_duration,
            max_duration,
        }
    }

    fn load_info(&self) -> Option<RefInfoDoc> {
        let path = self.model_dir.join("info.json");
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Collect candidates that pass the duration and text-length gates.
    ///
    /// Clips whose duration cannot be determined are excluded: a clip we
    /// cannot measure cannot be validated against the duration window.
    fn candidates(&self) -> Vec<Candidate> {
        let mut out = Vec::new();

        if let Some(info) = self.load_info() {
            let has_scores = info.ref_audios.iter().any(|r| r.score > 0);
            for (idx, descriptor) in info.ref_audios.iter().enumerate() {
                let audio_path = self.model_dir.join(&descriptor.audio);
                if !audio_path.exists() {
                    continue;
                }
                let Some(duration) = audio_duration(&audio_path) else {
                    debug!("excluding {}: duration unknown", descriptor.audio);
                    continue;
                };
                if !(self.min_duration..=self.max_duration).contains(&duration) {
                    continue;
                }
                let text_len = descriptor
                    .text_len
                    .unwrap_or_else(|| descriptor.text.chars().count());
                if text_len < MIN_REF_TEXT_LENGTH {
                    continue;
                }
                // Descriptor files from older preparation runs carry no
                // scores; their order encodes the preference instead.
                let base_score = if has_scores {
                    descriptor.score
                } else {
                    100 - idx as i64
                };
                out.push(Candidate {
                    audio_path,
                    text: descriptor.text.clone(),
                    title: descriptor.title.clone(),
                    base_score,
                    text_len,
                    duration,
                });
            }
            if !out.is_empty() {
                return out;
            }
        }

        // Fallback: preprocessed clips with sidecar transcripts.
        let preprocessed = self.model_dir.join("preprocessed");
        if preprocessed.is_dir() {
            let mut wavs: Vec<PathBuf> = std::fs::read_dir(&preprocessed)
                .into_iter()
                .flatten()
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "wav"))
                .collect();
            wavs.sort();
            for (idx, wav) in wavs.iter().enumerate() {
                let Some(duration) = audio_duration(wav) else {
                    continue;
                };
                if !(self.min_duration..=self.max_duration).contains(&duration) {
                    continue;
                }
                let text = std::fs::read_to_string(wav.with_extension("txt"))
                    .map(|t| t.trim().to_owned())
                    .unwrap_or_default();
                let text_len = text.chars().count();
                if text_len < MIN_REF_TEXT_LENGTH {
                    continue;
                }
                out.push(Candidate {
                    audio_path: wav.clone(),
                    text,
                    title: String::new(),
                    base_score: 100 - idx as i64,
                    text_len,
                    duration,
                });
            }
        }
        out
    }

    /// All passing clips, best score first.
    pub fn all_by_score(&self, exclude: Option<&Path>) -> Vec<ReferenceClip> {
        let mut candidates = self.candidates();
        candidates.retain(|c| exclude != Some(c.audio_path.as_path()));
        candidates.sort_by(|a, b| b.base_score.cmp(&a.base_score));
        candidates
            .into_iter()
            .map(|c| ReferenceClip {
                audio_path: c.audio_path,
                text: c.text,
                score: c.base_score,
                duration: c.duration,
            })
            .collect()
    }

    /// Single best clip by score.
    pub fn select_best(&self) -> Option<ReferenceClip> {
        self.all_by_score(None).into_iter().next()
    }

    /// Hybrid selection: top-N by score, re-weighted by how close the clip's
    /// transcript length is to the input text, then weighted-random among the
    /// survivors. Variety without giving up quality.
    pub fn select_hybrid(&self, input_text_len: usize) -> Option<ReferenceClip> {
        const TOP_N: usize = 4;

        let mut candidates = self.candidates();
        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| b.base_score.cmp(&a.base_score));
        candidates.truncate(TOP_N);

        let weighted: Vec<(i64, &Candidate)> = candidates
            .iter()
            .map(|c| {
                let len_diff = c.text_len.abs_diff(input_text_len) as i64;
                let len_bonus = (300 - len_diff * 10).max(0);
                let long_penalty = (c.text_len.saturating_sub(MAX_REF_TEXT_LENGTH) * 15) as i64;
                (c.base_score + len_bonus - long_penalty, c)
            })
            .collect();

        let total: i64 = weighted.iter().map(|(w, _)| *w).sum();
        let chosen = if total <= 0 {
            weighted
                .iter()
                .max_by_key(|(w, _)| *w)
                .map(|(_, c)| *c)?
        } else {
            let mut roll = rand::thread_rng().gen_range(0..total);
            let mut selected = weighted[0].1;
            for (weight, candidate) in &weighted {
                if roll < *weight {
                    selected = *candidate;
                    break;
                }
                roll -= *weight;
            }
            selected
        };

        Some(ReferenceClip {
            audio_path: chosen.audio_path.clone(),
            text: chosen.text.clone(),
            score: chosen.base_score,
            duration: chosen.duration,
        })
    }

    /// Top-K clips as auxiliary references for character-flavor injection.
    pub fn select_multi_tone(&self, count: usize) -> Vec<ReferenceClip> {
        let mut clips = self.all_by_score(None);
        clips.truncate(count);
        clips
    }

    /// ICL-mode selection: title and duration only, no transcript proximity.
    pub fn select_icl(&self, optimal_min: f64, optimal_max: f64) -> Option<ReferenceClip> {
        let mut scored: Vec<(i64, bool, Candidate)> = Vec::new();
        if let Some(info) = self.load_info() {
            for descriptor in info.ref_audios {
                if EXCLUDED_TITLES.contains(descriptor.title.as_str()) {
                    continue;
                }
                if descriptor.text.chars().count() < 5 {
                    continue;
                }
                let audio_path = self.model_dir.join(&descriptor.audio);
                let Some(duration) = audio_duration(&audio_path) else {
                    continue;
                };
                if !(3.0..=20.0).contains(&duration) {
                    continue;
                }
                let (score, is_optimal) =
                    icl_reference_score(&descriptor.title, duration, optimal_min, optimal_max);
                let text_len = descriptor.text.chars().count();
                scored.push((
                    score,
                    is_optimal,
                    Candidate {
                        audio_path,
                        text: descriptor.text,
                        title: descriptor.title,
                        base_score: score,
                        text_len,
                        duration,
                    },
                ));
            }
        }
        if scored.is_empty() {
            return None;
        }
        if scored.iter().any(|(_, optimal, _)| *optimal) {
            scored.retain(|(_, optimal, _)| *optimal);
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        let (score, _, best) = scored.into_iter().next()?;
        debug!(
            "ICL reference: {} (score {score}, {:.1}s, {:?})",
            best.audio_path.display(),
            best.duration,
            best.title
        );
        Some(ReferenceClip {
            audio_path: best.audio_path,
            text: best.text,
            score,
            duration: best.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn trust_touch_scores_160() {
        let (score, valid) = reference_score("신뢰도 터치", 20, 6.0, 3.0, 10.0);
        assert_eq!(score, 160);
        assert!(valid);
    }

    #[test]
    fn operation_failure_is_excluded() {
        assert!(is_excluded("작전 실패", "충분히 긴 대사 텍스트입니다"));
    }

    #[test]
    fn short_out_of_range_greeting_scores_44() {
        let (score, valid) = reference_score("인사", 8, 2.0, 3.0, 10.0);
        assert_eq!(score, 44);
        assert!(!valid);
    }

    #[test]
    fn long_text_is_penalized() {
        let (long, _) = reference_score("인사", 40, 6.0, 3.0, 10.0);
        let (ok, _) = reference_score("인사", 30, 6.0, 3.0, 10.0);
        // 10 characters over the cap at 15 points each, minus 5 lost text bonus.
        assert_eq!(ok - long, 145);
    }

    #[test]
    fn short_texts_are_excluded_outright() {
        assert!(is_excluded("인사", "하아"));
        assert!(!is_excluded("인사", "충분히 긴 대사 텍스트입니다"));
    }

    #[test]
    fn icl_score_peaks_near_nine_and_a_half_seconds() {
        let (at_peak, optimal) = icl_reference_score("인사", 9.5, 5.0, 15.0);
        let (off_peak, _) = icl_reference_score("인사", 18.0, 5.0, 15.0);
        assert!(optimal);
        assert_eq!(at_peak, 80 + 50 + 20);
        assert!(at_peak > off_peak);
    }

    /// Write a WAV of the given duration so the format-aware probe sees it.
    fn write_wav(path: &Path, seconds: f64) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(seconds * 16_000.0) as usize {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn seed_model_dir(dir: &Path) {
        write_wav(&dir.join("ref_touch.wav"), 6.0);
        write_wav(&dir.join("ref_short.wav"), 1.0);
        write_wav(&dir.join("ref_talk.wav"), 5.0);
        let info = serde_json::json!({
            "mode": "gpt_sovits",
            "ref_audios": [
                {"audio": "ref_touch.wav", "text": "박사님, 오늘도 잘 부탁드려요.", "title": "신뢰도 터치", "score": 160, "text_len": 17},
                {"audio": "ref_short.wav", "text": "너무 짧은 클립인데 길이는 충분함", "title": "인사", "score": 150, "text_len": 17},
                {"audio": "ref_talk.wav", "text": "같이 가실 거죠? 준비는 끝났어요.", "title": "대화 1", "score": 120, "text_len": 18},
                {"audio": "ref_missing.wav", "text": "파일이 없는 항목입니다만", "title": "대화 2", "score": 200, "text_len": 13}
            ]
        });
        std::fs::write(dir.join("info.json"), serde_json::to_string(&info).unwrap()).unwrap();
    }

    #[test]
    fn best_selection_honors_gates_and_scores() {
        let dir = tempfile::tempdir().unwrap();
        seed_model_dir(dir.path());
        let selector = ReferenceSelector::new(dir.path(), 3.0, 10.0);

        let best = selector.select_best().unwrap();
        // ref_missing has the top score but no file; ref_short is out of the
        // duration window. ref_touch wins.
        assert!(best.audio_path.ends_with("ref_touch.wav"));
        assert_eq!(best.score, 160);
        assert!((best.duration - 6.0).abs() < 0.05);
    }

    #[test]
    fn never_selects_below_minimum_text_length_when_alternatives_exist() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("a.wav"), 5.0);
        write_wav(&dir.path().join("b.wav"), 5.0);
        let info = serde_json::json!({
            "ref_audios": [
                {"audio": "a.wav", "text": "하아", "title": "방치", "score": 300},
                {"audio": "b.wav", "text": "괜찮아요, 박사님과 함께라면요.", "title": "대화 1", "score": 50}
            ]
        });
        std::fs::write(
            dir.path().join("info.json"),
            serde_json::to_string(&info).unwrap(),
        )
        .unwrap();

        let selector = ReferenceSelector::new(dir.path(), 3.0, 10.0);
        for _ in 0..16 {
            let clip = selector.select_hybrid(20).unwrap();
            assert!(clip.audio_path.ends_with("b.wav"));
        }
    }

    #[test]
    fn hybrid_stays_within_top_candidates() {
        let dir = tempfile::tempdir().unwrap();
        seed_model_dir(dir.path());
        let selector = ReferenceSelector::new(dir.path(), 3.0, 10.0);
        for _ in 0..16 {
            let clip = selector.select_hybrid(17).unwrap();
            assert!(
                clip.audio_path.ends_with("ref_touch.wav")
                    || clip.audio_path.ends_with("ref_talk.wav")
            );
        }
    }

    #[test]
    fn multi_tone_returns_top_k() {
        let dir = tempfile::tempdir().unwrap();
        seed_model_dir(dir.path());
        let selector = ReferenceSelector::new(dir.path(), 3.0, 10.0);
        let clips = selector.select_multi_tone(2);
        assert_eq!(clips.len(), 2);
        assert!(clips[0].score >= clips[1].score);
    }

    #[test]
    fn preprocessed_fallback_without_info_json() {
        let dir = tempfile::tempdir().unwrap();
        let pre = dir.path().join("preprocessed");
        std::fs::create_dir_all(&pre).unwrap();
        write_wav(&pre.join("CN_001.wav"), 5.0);
        std::fs::write(pre.join("CN_001.txt"), "박사님, 여기 계셨군요?").unwrap();

        let selector = ReferenceSelector::new(dir.path(), 3.0, 10.0);
        let best = selector.select_best().unwrap();
        assert!(best.audio_path.ends_with("CN_001.wav"));
        assert_eq!(best.text, "박사님, 여기 계셨군요?");
    }

    #[test]
    fn empty_model_dir_selects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let selector = ReferenceSelector::new(dir.path(), 3.0, 10.0);
        assert!(selector.select_best().is_none());
        assert!(selector.select_hybrid(20).is_none());
    }
}
