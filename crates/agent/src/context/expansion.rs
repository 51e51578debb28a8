//! Contextual query expansion for retrieval-backed responders.
//!
//! A short follow-up like "what about side effects?" retrieves poorly on its
//! own. The expanded query appends, in order:
//!
//! 1. the previous few user turns (each capped),
//! 2. symptom or medical terms from the other retrieval responder's recent
//!    replies,
//! 3. a handful of vocabulary terms from the background summary, only when
//!    the first two gave little signal.
//!
//! Repeated words are dropped and the result is capped; the output is one
//! search string, not a structured query.

use std::collections::HashSet;

use carebridge_config::ContextConfig;
use carebridge_core::message::Destination;

use crate::vocabulary::{Vocabulary, find_terms};

/// Characters kept from each previous user turn.
const USER_TURN_CHARS: usize = 120;

pub struct ExpansionInput<'a> {
    pub query: &'a str,
    pub destination: Destination,
    /// Previous user turns, newest first, without the current query
    pub recent_user_turns: &'a [&'a str],
    /// Replies from the other retrieval responder, newest first
    pub cross_agent_turns: &'a [&'a str],
    pub summary: Option<&'a str>,
    pub config: &'a ContextConfig,
}

pub fn build_expanded_query(input: &ExpansionInput<'_>) -> String {
    let mut parts: Vec<String> = vec![input.query.trim().to_string()];

    parts.extend(
        input
            .recent_user_turns
            .iter()
            .map(|t| truncate_chars(t.trim(), USER_TURN_CHARS)),
    );

    let cross_terms = cross_agent_terms(input.destination, input.cross_agent_turns);
    let thin_signal = input.recent_user_turns.len() < 2 || cross_terms.is_empty();
    parts.extend(cross_terms.into_iter().map(str::to_string));

    if thin_signal && let Some(summary) = input.summary {
        parts.extend(
            find_terms(summary, Vocabulary::summary_terms())
                .into_iter()
                .take(input.config.expansion_summary_terms)
                .map(str::to_string),
        );
    }

    let joined = dedup_words(&parts);
    truncate_chars(&joined, input.config.expansion_max_chars)
        .trim_end()
        .to_string()
}

/// Terms the other responder's replies contribute for `destination`.
fn cross_agent_terms<'a>(destination: Destination, turns: &[&str]) -> Vec<&'a str> {
    let mut terms: Vec<&'a str> = Vec::new();
    for turn in turns {
        let found = match destination {
            // educational answers pick up symptoms discussed by the product side
            Destination::Document => find_terms(turn, Vocabulary::SYMPTOMS.iter().copied()),
            Destination::Product => find_terms(
                turn,
                Vocabulary::CONDITIONS
                    .iter()
                    .chain(Vocabulary::CANCER_TYPES)
                    .copied(),
            ),
            Destination::Report => Vec::new(),
        };
        for term in found {
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
    }
    terms
}

fn dedup_words(parts: &[String]) -> String {
    let mut seen = HashSet::new();
    parts
        .iter()
        .flat_map(|p| p.split_whitespace())
        .filter(|word| {
            let key: String = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            key.is_empty() || seen.insert(key)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
