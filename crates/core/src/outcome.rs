//! Deciding when an interview is over and what it scored.
//!
//! Both adapters run raw model output through [`evaluate_response`] so the
//! end-of-interview rules do not depend on which backend produced the text.

use regex::Regex;
use std::sync::OnceLock;

use crate::provider::ProviderReply;

/// Marker the interviewer prompt asks the model to finish with.
pub const END_MARKER: &str = "INTERVIEW_END";

/// Conversation length at which the interview ends even without the marker.
pub const MAX_CONVERSATION_TURNS: usize = 20;

static MARKER: OnceLock<Regex> = OnceLock::new();
static EXPLICIT_SCORE: OnceLock<Regex> = OnceLock::new();
static BARE_NUMBER: OnceLock<Regex> = OnceLock::new();

fn marker() -> &'static Regex {
    MARKER.get_or_init(|| Regex::new(r"(?i)INTERVIEW_END").expect("valid marker regex"))
}

fn explicit_score() -> &'static Regex {
    EXPLICIT_SCORE.get_or_init(|| {
        Regex::new(r"(?i)(\d+)\s*(?:out of 100|/100|%)").expect("valid score regex")
    })
}

fn bare_number() -> &'static Regex {
    BARE_NUMBER
        .get_or_init(|| Regex::new(r"\b([0-9]|[1-9][0-9]|100)\b").expect("valid number regex"))
}

pub fn contains_end_marker(text: &str) -> bool {
    marker().is_match(text)
}

/// Removes every occurrence of the end marker and trims the result.
pub fn strip_end_marker(text: &str) -> String {
    marker().replace_all(text, "").trim().to_string()
}

/// Pulls a 0-100 score out of feedback text.
///
/// Tries "N out of 100", "N/100" and "N%" first, then the first standalone
/// integer in range, and finally synthesizes `min(70 + 2 * turn_count, 95)`.
/// The bare-number step can pick up unrelated figures such as a count of
/// years; it is kept for compatibility with existing feedback formats.
pub fn extract_score(feedback: &str, turn_count: usize) -> f64 {
    if let Some(value) = explicit_score()
        .captures(feedback)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return value.clamp(0.0, 100.0);
    }

    if let Some(value) = bare_number()
        .captures(feedback)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return value;
    }

    let synthesized = 70 + 2 * turn_count.min(MAX_CONVERSATION_TURNS);
    synthesized.min(95) as f64
}

/// Turns a raw model reply into the next step of the interview.
///
/// `turn_count` is the length of the conversation including the answer that
/// produced this reply.
pub fn evaluate_response(text: &str, turn_count: usize) -> ProviderReply {
    let text = text.trim();
    if contains_end_marker(text) || turn_count >= MAX_CONVERSATION_TURNS {
        let feedback = strip_end_marker(text);
        let score = extract_score(&feedback, turn_count);
        return ProviderReply::End {
            summary: Some(feedback.clone()),
            feedback,
            score,
        };
    }

    ProviderReply::Question {
        text: text.to_string(),
    }
}
