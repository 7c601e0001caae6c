//! Heuristic extraction of answers from raw completions.
//!
//! Multiple-choice priority: explicit label marker, then a bare label next to
//! a cue phrase, then an option-text match, then [`ParsedAnswer::Unparseable`].
//! When several candidates of the same tier exist, the one closest to a cue
//! phrase wins and ties go to the latest occurrence.

use crate::models::{OptionSet, ParsedAnswer};
use regex::Regex;
use std::cmp::Reverse;
use std::sync::OnceLock;

/// Phrases that tend to precede the final answer
pub const ANSWER_INDICATORS: &[&str] = &[
    "could be",
    "so",
    "is",
    "thus",
    "therefore",
    "final",
    "answer",
    "result",
    "그래서",
    "따라서",
    "그러므로",
    "최종",
    "답",
    "결과",
    "정답",
    "은",
    "는",
    "답은",
    "정답은",
];

/// Korean sentence-final forms that follow the answer
pub const SENTENCE_END_SUFFIXES: &[&str] = &["이다", "일 수 있다"];

/// Punctuation stripped from around labels and answer spans
pub const TRIVIAL_PATTERNS: &[char] = &[':', ',', '.', '!', '?', ';', '\''];

/// Markdown emphasis wrapped around labels ("**B**", "_B_")
const EMPHASIS_MARKS: &[char] = &['*', '_', '`'];

/// Maximum gap in bytes between a cue and a bare label
const CUE_WINDOW: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CueSide {
    /// Cue appears before the answer ("the answer is")
    Before,
    /// Cue appears after the answer ("...이다")
    After,
}

#[derive(Debug, Clone, Copy)]
struct Cue {
    start: usize,
    end: usize,
    side: CueSide,
}

#[derive(Debug, Clone)]
struct Candidate {
    label: String,
    start: usize,
    end: usize,
}

impl Candidate {
    /// Byte distance to the nearest cue, if any cue points at this span.
    /// A label directly followed by a cue ("B is the answer") counts too.
    fn cue_distance(&self, text: &str, cues: &[Cue]) -> Option<usize> {
        cues.iter()
            .filter_map(|cue| match cue.side {
                CueSide::Before if cue.end <= self.start => Some(self.start - cue.end),
                CueSide::Before if cue.start >= self.end && only_padding(&text[self.end..cue.start]) => {
                    Some(cue.start - self.end)
                }
                CueSide::After if cue.start >= self.end => Some(cue.start - self.end),
                _ => None,
            })
            .min()
    }
}

fn explicit_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(\s*([A-Z])\s*\)|\[\s*([A-Z])\s*\]|(?:^|[^A-Za-z0-9])([A-Z])\s*[):：]")
            .unwrap_or_else(|e| unreachable!("static pattern: {}", e))
    })
}

fn only_padding(gap: &str) -> bool {
    gap.chars().all(|c| c.is_whitespace() || EMPHASIS_MARKS.contains(&c))
}

fn is_ascii_word(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

fn is_boundary(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => !is_ascii_word(c),
    }
}

/// Locate cue phrases, matched ASCII-case-insensitively so byte offsets line
/// up with the original text
fn find_cues(text: &str) -> Vec<Cue> {
    let lowered = text.to_ascii_lowercase();
    let mut cues = Vec::new();

    for indicator in ANSWER_INDICATORS {
        let ascii = indicator.is_ascii();
        for (start, matched) in lowered.match_indices(indicator) {
            let end = start + matched.len();
            let before = lowered[..start].chars().next_back();
            let after = lowered[end..].chars().next();
            let ok = if ascii {
                is_boundary(before) && is_boundary(after)
            } else {
                // Korean particles attach to the preceding noun
                after.is_none_or(|c| c.is_whitespace() || TRIVIAL_PATTERNS.contains(&c))
            };
            if ok {
                cues.push(Cue { start, end, side: CueSide::Before });
            }
        }
    }

    for suffix in SENTENCE_END_SUFFIXES {
        for (start, matched) in lowered.match_indices(suffix) {
            cues.push(Cue {
                start,
                end: start + matched.len(),
                side: CueSide::After,
            });
        }
    }

    cues
}

fn strip_trivial(text: &str) -> &str {
    text.trim().trim_matches(|c: char| {
        TRIVIAL_PATTERNS.contains(&c) || EMPHASIS_MARKS.contains(&c) || c.is_whitespace()
    })
}

/// Pick the candidate closest to a cue; ties go to the latest, then longest span
fn choose(candidates: Vec<Candidate>, text: &str, cues: &[Cue]) -> Option<Candidate> {
    candidates.into_iter().min_by_key(|c| {
        (
            c.cue_distance(text, cues).unwrap_or(usize::MAX),
            Reverse(c.start),
            Reverse(c.end - c.start),
        )
    })
}

fn explicit_candidates(text: &str, valid: &[String]) -> Vec<Candidate> {
    explicit_marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))?;
            valid.iter().any(|v| v == label.as_str()).then(|| Candidate {
                label: label.as_str().to_string(),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

fn bare_candidates(text: &str, valid: &[String], cues: &[Cue]) -> Vec<Candidate> {
    let mut found = Vec::new();
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        if c.is_ascii_uppercase() && is_boundary(prev) && is_boundary(next) {
            let label = c.to_string();
            if valid.contains(&label) {
                let candidate = Candidate {
                    label,
                    start: idx,
                    end: idx + 1,
                };
                if candidate
                    .cue_distance(text, cues)
                    .is_some_and(|d| d <= CUE_WINDOW)
                {
                    found.push(candidate);
                }
            }
        }
        prev = Some(c);
    }

    found
}

fn option_text_candidates(text: &str, options: &OptionSet) -> Vec<Candidate> {
    let lowered = text.to_ascii_lowercase();
    let mut found: Vec<Candidate> = Vec::new();

    for (label, option) in options.iter() {
        let needle = strip_trivial(option).to_ascii_lowercase();
        if needle.is_empty() {
            continue;
        }
        for (start, matched) in lowered.match_indices(needle.as_str()) {
            found.push(Candidate {
                label: label.clone(),
                start,
                end: start + matched.len(),
            });
        }
    }

    // Drop matches swallowed by a longer option ("steel" inside "steel frame")
    let spans: Vec<(usize, usize)> = found.iter().map(|c| (c.start, c.end)).collect();
    found
        .into_iter()
        .filter(|c| {
            !spans.iter().any(|&(s, e)| {
                s <= c.start && c.end <= e && (e - s) > (c.end - c.start)
            })
        })
        .collect()
}

/// Extract a multiple-choice label from a completion
pub fn parse_multi_choice_response(response: &str, options: &OptionSet) -> ParsedAnswer {
    let valid = options.labels();
    if valid.is_empty() {
        return ParsedAnswer::Unparseable;
    }

    // A reply that is nothing but a label
    let bare = strip_trivial(response)
        .trim_matches(|c| matches!(c, '(' | ')' | '[' | ']'))
        .trim_matches(EMPHASIS_MARKS);
    if valid.iter().any(|v| v.eq_ignore_ascii_case(bare)) {
        return ParsedAnswer::Label(bare.to_ascii_uppercase());
    }

    let cues = find_cues(response);

    let tiers = [
        explicit_candidates(response, &valid),
        bare_candidates(response, &valid, &cues),
        option_text_candidates(response, options),
    ];

    for candidates in tiers {
        if let Some(best) = choose(candidates, response, &cues) {
            tracing::trace!(label = %best.label, position = best.start, "label candidate selected");
            return ParsedAnswer::Label(best.label);
        }
    }

    ParsedAnswer::Unparseable
}

/// Extract the trailing free-text answer from a completion
pub fn parse_open_response(response: &str) -> ParsedAnswer {
    let cues = find_cues(response);

    let span = cues
        .iter()
        .filter(|c| c.side == CueSide::Before)
        .max_by_key(|c| c.end)
        .map(|cue| {
            let rest = &response[cue.end..];
            let line_end = rest.find('\n').unwrap_or(rest.len());
            &rest[..line_end]
        })
        .map(strip_trivial)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            response
                .lines()
                .map(strip_trivial)
                .filter(|l| !l.is_empty())
                .last()
        });

    match span {
        Some(span) => {
            let trimmed = SENTENCE_END_SUFFIXES
                .iter()
                .find_map(|suffix| span.strip_suffix(suffix))
                .map(strip_trivial)
                .filter(|s| !s.is_empty())
                .unwrap_or(span);
            ParsedAnswer::Text(trimmed.to_string())
        }
        None => ParsedAnswer::Unparseable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn materials() -> OptionSet {
        OptionSet::new(vec!["steel".into(), "concrete".into(), "wood".into()]).unwrap()
    }

    fn label(s: &str) -> ParsedAnswer {
        ParsedAnswer::Label(s.to_string())
    }

    #[test]
    fn test_explicit_marker_after_cue() {
        let parsed = parse_multi_choice_response(
            "Cement hydrates over time, so the answer is (B) concrete.",
            &materials(),
        );
        assert_eq!(parsed, label("B"));
    }

    #[test]
    fn test_option_text_without_marker() {
        assert_eq!(parse_multi_choice_response("concrete", &materials()), label("B"));
        assert_eq!(
            parse_multi_choice_response("It has to be WOOD given the fire rating", &materials()),
            label("C")
        );
    }

    #[test]
    fn test_unparseable() {
        let parsed = parse_multi_choice_response("I am not sure about this one.", &materials());
        assert_eq!(parsed, ParsedAnswer::Unparseable);
        assert_eq!(parse_multi_choice_response("", &materials()), ParsedAnswer::Unparseable);
    }

    #[test]
    fn test_bare_label_reply_with_punctuation() {
        for reply in ["B", "B.", " b! ", "(C)", "A;"] {
            let expected = reply
                .chars()
                .find(|c| c.is_ascii_alphabetic())
                .unwrap()
                .to_ascii_uppercase()
                .to_string();
            assert_eq!(parse_multi_choice_response(reply, &materials()), label(&expected));
        }
    }

    #[test]
    fn test_markdown_emphasis_around_label() {
        assert_eq!(parse_multi_choice_response("**B**", &materials()), label("B"));
        assert_eq!(parse_multi_choice_response("*B*", &materials()), label("B"));
        assert_eq!(parse_multi_choice_response("**(C)**", &materials()), label("C"));
        assert_eq!(parse_multi_choice_response("_A_.", &materials()), label("A"));
        assert_eq!(
            parse_multi_choice_response("The answer is **B**.", &materials()),
            label("B")
        );
    }

    #[test]
    fn test_label_before_cue() {
        assert_eq!(parse_multi_choice_response("Option B is correct.", &materials()), label("B"));
        assert_eq!(parse_multi_choice_response("B is the answer.", &materials()), label("B"));
        assert_eq!(
            parse_multi_choice_response("**C** is the final answer", &materials()),
            label("C")
        );
        assert_eq!(
            parse_multi_choice_response("Option B is correct, not A.", &materials()),
            label("B")
        );
    }

    #[test]
    fn test_open_response_strips_emphasis() {
        assert_eq!(
            parse_open_response("The answer is **42 kN**."),
            ParsedAnswer::Text("42 kN".to_string())
        );
    }

    #[test]
    fn test_colon_and_paren_markers() {
        assert_eq!(parse_multi_choice_response("Answer: C", &materials()), label("C"));
        assert_eq!(parse_multi_choice_response("My pick is A) steel", &materials()), label("A"));
    }

    #[test]
    fn test_labels_outside_option_range_ignored() {
        assert_eq!(
            parse_multi_choice_response("The answer is (D).", &materials()),
            ParsedAnswer::Unparseable
        );
    }

    #[test]
    fn test_cue_proximity_beats_position() {
        let text = "Therefore the answer is (A).\n\nOption (C) was considered but rejected.";
        assert_eq!(parse_multi_choice_response(text, &materials()), label("A"));
    }

    #[test]
    fn test_tie_goes_to_latest_occurrence() {
        let text = "(A) steel\n(B) concrete\n(C) wood";
        assert_eq!(parse_multi_choice_response(text, &materials()), label("C"));
    }

    #[test]
    fn test_multiline_scan() {
        let text = "Let me think step by step.\nSteel conducts heat.\n\nFinal answer: (B)";
        assert_eq!(parse_multi_choice_response(text, &materials()), label("B"));
    }

    #[test]
    fn test_article_a_not_taken_as_label() {
        let text = "A beam made of this material would be heavy. Thus wood.";
        assert_eq!(parse_multi_choice_response(text, &materials()), label("C"));
    }

    #[test]
    fn test_bare_label_next_to_cue() {
        let text = "Considering shrinkage, the answer is B";
        assert_eq!(parse_multi_choice_response(text, &materials()), label("B"));
    }

    #[test]
    fn test_korean_cues() {
        let text = "콘크리트의 특성을 고려하면 정답은 B이다.";
        assert_eq!(parse_multi_choice_response(text, &materials()), label("B"));

        let text = "따라서 C";
        assert_eq!(parse_multi_choice_response(text, &materials()), label("C"));
    }

    #[test]
    fn test_longer_option_wins_over_substring() {
        let options =
            OptionSet::new(vec!["steel".into(), "steel frame".into(), "timber".into()]).unwrap();
        assert_eq!(
            parse_multi_choice_response("I would use a steel frame here", &options),
            label("B")
        );
    }

    #[test]
    fn test_open_response_after_cue() {
        assert_eq!(
            parse_open_response("Summing the loads, the final answer is 42 kN."),
            ParsedAnswer::Text("42 kN".to_string())
        );
    }

    #[test]
    fn test_open_response_korean_suffix() {
        assert_eq!(
            parse_open_response("정답은 철근이다."),
            ParsedAnswer::Text("철근".to_string())
        );
    }

    #[test]
    fn test_open_response_falls_back_to_last_line() {
        assert_eq!(
            parse_open_response("Working through it\nrebar"),
            ParsedAnswer::Text("rebar".to_string())
        );
        assert_eq!(parse_open_response("   \n  "), ParsedAnswer::Unparseable);
    }
}
