//! Text preparation for synthesis.
//!
//! The synthesis engine truncates long inputs (early end-of-speech), mangles
//! stage directions, and reads digits poorly. Before a line is synthesized it
//! is normalized (Korean number words, punctuation cleanup), then split into
//! short segments that are synthesized independently and stitched back
//! together with punctuation-class silence gaps.

use regex::Regex;
use std::sync::LazyLock;

static PUNCT_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.\s…,?!~]+").unwrap());
static PAREN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\([^)]*\)").unwrap());
static DOTS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}|…+").unwrap());
static BANG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?!]{2,}").unwrap());
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static LEADING_PUNCT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[,.…\s]+").unwrap());
static COMMA_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*,+").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Silence gap classes between stitched segments, in milliseconds.
pub const PAUSE_COMMA_MS: u32 = 250;
pub const PAUSE_ELLIPSIS_MS: u32 = 450;
pub const PAUSE_SENTENCE_MS: u32 = 150;

/// Segments shorter than this are merged into a neighbor.
const MIN_SEGMENT_CHARS: usize = 3;

/// Clean a line for synthesis.
///
/// Returns `None` for lines with nothing speakable, and a filler vocalization
/// for lines that are only punctuation (a trailing "……" beat in the script).
pub fn preprocess(text: &str) -> Option<String> {
    let meaningful = PUNCT_ONLY_RE.replace_all(text, "");
    if meaningful.is_empty() {
        return Some("음...".to_owned());
    }

    // Parenthesized stage directions are not read aloud.
    let text = PAREN_RE.replace_all(text, "");
    // Ellipsis runs collapse to a single mark so the splitter sees one beat.
    let text = DOTS_RE.replace_all(&text, "…");
    let text = BANG_RE.replace_all(&text, "?");
    let text = SPACE_RE.replace_all(&text, " ");
    let text = LEADING_PUNCT_RE.replace(&text, "");
    let text = COMMA_RUN_RE.replace_all(&text, ",");

    let cleaned = text.trim().to_owned();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split text into synthesis segments.
///
/// Sentence-terminating punctuation always splits; commas split only segments
/// still over `max_length`; fragments under three characters merge into their
/// neighbors.
pub fn split_for_synthesis(text: &str, max_length: usize) -> Vec<String> {
    // Pass 1: split on sentence enders, keeping the ender on its segment.
    let mut sentences: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '…') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_owned());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_owned());
    }

    // Pass 2: re-join adjacent sentences while they fit.
    let mut packed: Vec<String> = Vec::new();
    for sentence in sentences {
        match packed.last_mut() {
            Some(last) if char_len(last) + 1 + char_len(&sentence) <= max_length => {
                last.push(' ');
                last.push_str(&sentence);
            }
            _ => packed.push(sentence),
        }
    }

    // Pass 3: comma-split only segments still over the limit.
    let mut segments: Vec<String> = Vec::new();
    for segment in packed {
        if char_len(&segment) <= max_length {
            segments.push(segment);
            continue;
        }
        let parts: Vec<&str> = segment
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() > 1 {
            segments.extend(parts.into_iter().map(str::to_owned));
        } else {
            segments.push(segment);
        }
    }

    // Pass 4: fold sub-3-character fragments into a neighbor.
    let mut merged: Vec<String> = Vec::new();
    for segment in segments {
        if char_len(&segment) < MIN_SEGMENT_CHARS {
            if let Some(last) = merged.last_mut() {
                last.push(' ');
                last.push_str(&segment);
                continue;
            }
        }
        merged.push(segment);
    }
    if merged.len() >= 2 && char_len(&merged[0]) < MIN_SEGMENT_CHARS {
        let head = merged.remove(0);
        merged[0] = format!("{head} {}", merged[0]);
    }

    if merged.is_empty() {
        vec![text.to_owned()]
    } else {
        merged
    }
}

/// Silence to insert after a segment, by its trailing punctuation class.
pub fn pause_after_segment(segment: &str) -> u32 {
    match segment.chars().next_back() {
        Some('…') => PAUSE_ELLIPSIS_MS,
        Some('.') | Some('!') | Some('?') => PAUSE_SENTENCE_MS,
        // Comma-split fragments carry no trailing punctuation.
        _ => PAUSE_COMMA_MS,
    }
}

const SINO_DIGITS: [&str; 10] = ["영", "일", "이", "삼", "사", "오", "육", "칠", "팔", "구"];
const NATIVE_ONES: [&str; 10] = [
    "", "하나", "둘", "셋", "넷", "다섯", "여섯", "일곱", "여덟", "아홉",
];
const NATIVE_ONES_DETERMINER: [&str; 10] = [
    "", "한", "두", "세", "네", "다섯", "여섯", "일곱", "여덟", "아홉",
];
const NATIVE_TENS: [&str; 10] = [
    "", "열", "스물", "서른", "마흔", "쉰", "예순", "일흔", "여든", "아흔",
];

/// Counters that take native Korean numbers (개, 명, 살, ...).
const NATIVE_COUNTERS: [&str; 10] = [
    "개", "명", "살", "번", "시간", "시", "마리", "잔", "병", "사람",
];

/// Sino-Korean reading of an integer (`37` → `삼십칠`).
pub fn sino_number(n: u64) -> String {
    if n == 0 {
        return SINO_DIGITS[0].to_owned();
    }
    if n >= 10_000 {
        let high = sino_number(n / 10_000);
        let rest = n % 10_000;
        let mut out = if high == "일" {
            "만".to_owned()
        } else {
            format!("{high}만")
        };
        if rest > 0 {
            out.push_str(&sino_number(rest));
        }
        return out;
    }

    let mut out = String::new();
    let units = [(1000, "천"), (100, "백"), (10, "십")];
    let mut rest = n;
    for (value, unit) in units {
        let digit = rest / value;
        if digit > 0 {
            if digit > 1 {
                out.push_str(SINO_DIGITS[digit as usize]);
            }
            out.push_str(unit);
        }
        rest %= value;
    }
    if rest > 0 {
        out.push_str(SINO_DIGITS[rest as usize]);
    }
    out
}

/// Native Korean reading of 1..=99, in determiner form when the number
/// modifies a counter (`3` → `세`, `20` → `스무`, `21` → `스물한`).
pub fn native_number(n: u64, determiner: bool) -> String {
    debug_assert!((1..=99).contains(&n));
    let tens = (n / 10) as usize;
    let ones = (n % 10) as usize;

    if n == 20 && determiner {
        return "스무".to_owned();
    }
    let mut out = NATIVE_TENS[tens].to_owned();
    if ones > 0 {
        // Compound 20+n keeps the 스물 stem.
        out.push_str(if determiner {
            NATIVE_ONES_DETERMINER[ones]
        } else {
            NATIVE_ONES[ones]
        });
    }
    out
}

/// Replace digit runs with Korean number words.
///
/// The suffix after a number decides the reading: native counters get native
/// numbers (up to 99), everything else is Sino-Korean. Decimals read as
/// `<int>점<digit><digit>…`, always Sino.
pub fn normalize_numbers(text: &str) -> String {
    let mut out = String::new();
    let mut last_end = 0;

    for m in NUMBER_RE.find_iter(text) {
        out.push_str(&text[last_end..m.start()]);
        let token = m.as_str();
        let suffix = &text[m.end()..];
        out.push_str(&read_number(token, suffix));
        last_end = m.end();
    }
    out.push_str(&text[last_end..]);
    out
}

fn read_number(token: &str, suffix: &str) -> String {
    if let Some((int_part, frac_part)) = token.split_once('.') {
        let int_value: u64 = int_part.parse().unwrap_or(0);
        let mut out = sino_number(int_value);
        out.push('점');
        for c in frac_part.chars() {
            let digit = c.to_digit(10).unwrap_or(0) as usize;
            out.push_str(SINO_DIGITS[digit]);
        }
        return out;
    }

    let Ok(value) = token.parse::<u64>() else {
        return token.to_owned();
    };
    let native_suffix = NATIVE_COUNTERS
        .iter()
        .any(|counter| suffix.trim_start().starts_with(counter));
    if native_suffix && (1..=99).contains(&value) {
        native_number(value, true)
    } else {
        sino_number(value)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn punctuation_only_becomes_filler() {
        assert_eq!(preprocess("......").as_deref(), Some("음..."));
        assert_eq!(preprocess("…!?").as_deref(), Some("음..."));
    }

    #[test]
    fn stage_directions_are_dropped() {
        assert_eq!(
            preprocess("(한숨) 알겠습니다, 박사님.").as_deref(),
            Some("알겠습니다, 박사님.")
        );
    }

    #[test]
    fn ellipsis_runs_collapse() {
        assert_eq!(
            preprocess("그게…… 사실이라면.").as_deref(),
            Some("그게… 사실이라면.")
        );
        assert_eq!(preprocess("정말?!?!").as_deref(), Some("정말?"));
    }

    #[test]
    fn short_text_is_not_split() {
        let segments = split_for_synthesis("박사님, 여기예요.", 35);
        assert_eq!(segments, ["박사님, 여기예요."]);
    }

    #[test]
    fn sentences_split_and_pack() {
        let segments = split_for_synthesis(
            "첫 번째 문장입니다. 두 번째 문장은 조금 더 깁니다! 마지막 문장도 깁니다.",
            20,
        );
        assert_eq!(
            segments,
            [
                "첫 번째 문장입니다.",
                "두 번째 문장은 조금 더 깁니다!",
                "마지막 문장도 깁니다."
            ]
        );
    }

    #[test]
    fn overlong_sentences_split_on_commas() {
        let text = "이 문장은 아주 길어서, 쉼표 기준으로 나눠야만, 합성 품질이 유지됩니다";
        let segments = split_for_synthesis(text, 20);
        assert_eq!(
            segments,
            ["이 문장은 아주 길어서", "쉼표 기준으로 나눠야만", "합성 품질이 유지됩니다"]
        );
    }

    #[test]
    fn tiny_fragments_merge_into_neighbors() {
        let segments = split_for_synthesis("네. 알겠습니다, 바로 출발하죠.", 35);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].starts_with("네."));
    }

    #[test]
    fn pause_classes() {
        assert_eq!(pause_after_segment("기다려 주세요…"), PAUSE_ELLIPSIS_MS);
        assert_eq!(pause_after_segment("출발합니다."), PAUSE_SENTENCE_MS);
        assert_eq!(pause_after_segment("쉼표로 잘린 조각"), PAUSE_COMMA_MS);
    }

    #[test]
    fn sino_numbers() {
        assert_eq!(sino_number(0), "영");
        assert_eq!(sino_number(7), "칠");
        assert_eq!(sino_number(10), "십");
        assert_eq!(sino_number(37), "삼십칠");
        assert_eq!(sino_number(100), "백");
        assert_eq!(sino_number(1945), "천구백사십오");
        assert_eq!(sino_number(10_000), "만");
        assert_eq!(sino_number(23_456), "이만삼천사백오십육");
    }

    #[test]
    fn native_numbers_with_compounds() {
        assert_eq!(native_number(1, true), "한");
        assert_eq!(native_number(3, true), "세");
        assert_eq!(native_number(12, true), "열두");
        assert_eq!(native_number(20, true), "스무");
        assert_eq!(native_number(20, false), "스물");
        assert_eq!(native_number(21, true), "스물한");
        assert_eq!(native_number(45, false), "마흔다섯");
    }

    #[test]
    fn counters_pick_the_reading() {
        assert_eq!(normalize_numbers("3개 남았다"), "세개 남았다");
        assert_eq!(normalize_numbers("21명이 왔다"), "스물한명이 왔다");
        assert_eq!(normalize_numbers("30분 후"), "삼십분 후");
        assert_eq!(normalize_numbers("100개"), "백개");
    }

    #[test]
    fn decimals_read_with_jeom() {
        assert_eq!(normalize_numbers("1.5초 뒤"), "일점오초 뒤");
        assert_eq!(normalize_numbers("범위는 12.34"), "범위는 십이점삼사");
    }
}
