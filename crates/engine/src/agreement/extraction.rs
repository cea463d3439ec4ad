//! Stage 1: deterministic answer extraction.
//!
//! No LLM involved. Pull an explicit answer out of a turn if one
//! exists, score confidence from hedging and assertive vocabulary, and
//! collect reasoning steps and self-correction flags.

use regex::Regex;

use sy_domain::agreement::{AnswerExtraction, AnswerLocation};

const HEDGING_WORDS: &[&str] = &[
    "maybe",
    "perhaps",
    "possibly",
    "likely",
    "probably",
    "i think",
    "i believe",
    "not sure",
    "unsure",
    "uncertain",
    "might be",
    "could be",
    "roughly",
    "approximately",
];

const ASSERTIVE_WORDS: &[&str] = &[
    "definitely",
    "certainly",
    "clearly",
    "exactly",
    "precisely",
    "verified",
    "confirmed",
    "without doubt",
];

const ERROR_MARKERS: &[&str] = &[
    "i made an error",
    "i made a mistake",
    "correction:",
    "wait,",
    "actually,",
    "let me reconsider",
    "on second thought",
    "that was wrong",
];

/// Extract the structured view of one turn.
pub fn extract(content: &str) -> AnswerExtraction {
    let lower = content.to_lowercase();

    let (final_answer, answer_location) = find_answer(content);
    let has_explicit_answer = final_answer.is_some();

    let confidence_keywords: Vec<String> = ASSERTIVE_WORDS
        .iter()
        .filter(|w| lower.contains(*w))
        .map(|w| (*w).to_owned())
        .collect();
    let hedges = HEDGING_WORDS.iter().filter(|w| lower.contains(*w)).count();

    let mut confidence: f32 = 0.5;
    if has_explicit_answer {
        confidence += 0.3;
    }
    confidence += 0.05 * confidence_keywords.len() as f32;
    confidence -= 0.1 * hedges as f32;
    let confidence_score = confidence.clamp(0.0, 1.0);

    let error_flags: Vec<String> = ERROR_MARKERS
        .iter()
        .filter(|m| lower.contains(*m))
        .map(|m| (*m).to_owned())
        .collect();

    AnswerExtraction {
        final_answer,
        confidence_score,
        confidence_keywords,
        reasoning_steps: reasoning_steps(content),
        error_flags,
        has_explicit_answer,
        answer_location,
    }
}

/// Locate an explicit answer: a labelled answer phrase anywhere, or a
/// bare numeric/bold value on the closing lines.
fn find_answer(content: &str) -> (Option<String>, AnswerLocation) {
    let labelled = Regex::new(
        r"(?i)(?:final answer|the answer is|answer|result)\s*[:=]?\s*(?:is\s+)?([^\n.,;]+)",
    )
    .expect("static regex");
    let bare_number = Regex::new(r"^\s*\**\s*(-?[\d,]+(?:\.\d+)?)\s*\**\s*$").expect("static regex");
    let bold = Regex::new(r"\*\*([^*\n]+)\*\*").expect("static regex");

    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail_start = lines.len().saturating_sub(2);

    // Closing lines first: a bare value or bold span there is the
    // model's conclusion.
    for (i, line) in lines.iter().enumerate().rev() {
        if let Some(cap) = labelled.captures(line) {
            let location = if i >= tail_start {
                AnswerLocation::FinalLine
            } else {
                AnswerLocation::Inline
            };
            return (Some(normalize_answer(&cap[1])), location);
        }
        if i >= tail_start {
            if let Some(cap) = bare_number.captures(line) {
                return (Some(normalize_answer(&cap[1])), AnswerLocation::FinalLine);
            }
            if let Some(cap) = bold.captures(line) {
                return (Some(normalize_answer(&cap[1])), AnswerLocation::FinalLine);
            }
        }
    }

    (None, AnswerLocation::Absent)
}

/// Numbered, bulleted, and "step N" lines, in order.
fn reasoning_steps(content: &str) -> Vec<String> {
    let step = Regex::new(r"(?i)^\s*(?:\d+[.)]|[*\-•]|step\s+\d+[:.]?)\s+(.+)$")
        .expect("static regex");
    content
        .lines()
        .filter_map(|line| step.captures(line).map(|cap| cap[1].trim().to_owned()))
        .collect()
}

/// Canonical form for answer equality: trimmed, lowercased, no wrapping
/// markup, no trailing punctuation, thousands separators removed.
pub fn normalize_answer(answer: &str) -> String {
    let mut s = answer.trim().to_lowercase();
    s = s
        .trim_matches(|c: char| c == '*' || c == '"' || c == '\'' || c == '`')
        .trim_end_matches(['.', '!', '?'])
        .trim()
        .to_owned();
    if s.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.' || c == '-') {
        s = s.replace(',', "");
    }
    s
}

/// Whether two extracted answers denote the same value. Numeric answers
/// compare numerically, everything else by canonical string.
pub fn answers_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_answer(a), normalize_answer(b));
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        return (x - y).abs() < 1e-9;
    }
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_answer_on_final_line() {
        let extraction = extract("Let me work through this.\n15 x 17 = 255\nThe answer is 255.");
        assert!(extraction.has_explicit_answer);
        assert_eq!(extraction.final_answer.as_deref(), Some("255"));
        assert_eq!(extraction.answer_location, AnswerLocation::FinalLine);
    }

    #[test]
    fn bare_number_close_counts_as_answer() {
        let extraction = extract("Working:\n15 * 17\n= 15 * 16 + 15\n**255**");
        assert_eq!(extraction.final_answer.as_deref(), Some("255"));
        assert_eq!(extraction.answer_location, AnswerLocation::FinalLine);
    }

    #[test]
    fn no_answer_in_pure_discussion() {
        let extraction = extract("There are several ways to think about this problem.");
        assert!(!extraction.has_explicit_answer);
        assert_eq!(extraction.answer_location, AnswerLocation::Absent);
    }

    #[test]
    fn hedging_lowers_confidence_assertion_raises_it() {
        let hedged = extract("Maybe the answer is 255, but I'm not sure. Possibly 265.");
        let confident = extract("The answer is definitely 255. Verified by two methods.");
        assert!(confident.confidence_score > hedged.confidence_score);
        assert!(confident
            .confidence_keywords
            .contains(&"definitely".to_owned()));
    }

    #[test]
    fn error_markers_are_flagged() {
        let extraction = extract("The product is 245. Wait, I made an error. It is 255.");
        assert!(!extraction.error_flags.is_empty());
    }

    #[test]
    fn reasoning_steps_collected_in_order() {
        let extraction = extract("1. decompose 17 as 16+1\n2. multiply\n3. add\nAnswer: 255");
        assert_eq!(extraction.reasoning_steps.len(), 3);
        assert_eq!(extraction.reasoning_steps[0], "decompose 17 as 16+1");
    }

    #[test]
    fn numeric_equality_survives_formatting() {
        assert!(answers_match("1,255", "1255"));
        assert!(answers_match("255", "255.0"));
        assert!(answers_match("**255**", "255."));
        assert!(!answers_match("255", "256"));
    }

    #[test]
    fn textual_equality_is_case_insensitive() {
        assert!(answers_match("Quicksort", "quicksort"));
        assert!(!answers_match("quicksort", "mergesort"));
    }
}
