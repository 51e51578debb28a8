//! The shared medical vocabulary.
//!
//! Every keyword list the assistant matches against lives here: the
//! ContextAssembler's relevance filter and query expansion, the summary
//! engine's medical digest and the report responder's product-term mining
//! all read the same table, so they cannot drift apart.
//!
//! Matching is case-insensitive and word-based. A multi-word term matches as
//! a phrase, and the last word of a term also matches its plural
//! (`side effect` matches "side effects").

use carebridge_core::message::Destination;

pub struct Vocabulary;

impl Vocabulary {
    /// Bumped whenever a list changes.
    pub const VERSION: u32 = 1;

    pub const SYMPTOMS: &'static [&'static str] = &[
        "fatigue",
        "nausea",
        "pain",
        "vomiting",
        "weakness",
        "appetite",
        "sleep",
        "anxiety",
        "depression",
        "mucositis",
        "neuropathy",
        "constipation",
        "diarrhea",
        "skin",
        "rash",
        "hair",
        "mouth",
        "ulcer",
        "hydration",
        "fever",
        "infection",
        "bleeding",
        "side effect",
    ];

    pub const CONDITIONS: &'static [&'static str] = &[
        "cancer",
        "tumor",
        "tumour",
        "oncology",
        "chemotherapy",
        "radiation",
        "surgery",
        "immunotherapy",
        "targeted therapy",
        "hormone therapy",
        "metastasis",
        "staging",
        "grade",
        "biopsy",
        "pathology",
        "diagnosis",
        "prognosis",
        "screening",
    ];

    pub const CANCER_TYPES: &'static [&'static str] = &[
        "breast",
        "lung",
        "colon",
        "prostate",
        "liver",
        "kidney",
        "brain",
        "ovarian",
        "cervical",
        "pancreatic",
        "stomach",
        "bladder",
        "thyroid",
        "lymphoma",
        "leukemia",
        "melanoma",
        "sarcoma",
    ];

    pub const TREATMENTS: &'static [&'static str] = &[
        "chemotherapy",
        "radiation",
        "surgery",
        "immunotherapy",
        "targeted therapy",
        "hormone therapy",
        "treatment",
        "therapy",
        "supplement",
        "medicine",
        "medication",
        "support",
    ];

    /// Signals that make an answer worth mining for product search terms.
    pub const SUPPLEMENT_INDICATORS: &'static [&'static str] = &[
        "deficiency",
        "deficient",
        "supplement",
        "supplementation",
        "vitamin",
        "iron",
        "calcium",
        "low levels",
        "anemia",
        "fatigue",
        "weakness",
    ];

    /// Symptom words lifted from report answers into product searches.
    pub const PRODUCT_SYMPTOMS: &'static [&'static str] = &[
        "fatigue",
        "nausea",
        "pain",
        "weakness",
        "appetite loss",
        "immune support",
        "energy",
        "nutrition",
        "anemia",
    ];

    /// Answer signals used to tag a report answer's `analysis_type`,
    /// checked in this order.
    pub const DEFICIENCY_SIGNALS: &'static [&'static str] =
        &["deficiency", "deficient", "low levels", "shortage"];
    pub const ABNORMAL_SIGNALS: &'static [&'static str] =
        &["abnormal", "concerning", "elevated", "high levels"];
    pub const SYMPTOM_SIGNALS: &'static [&'static str] =
        &["symptom", "side effect", "nausea", "fatigue", "pain"];

    const PRODUCT_KEYWORDS: &'static [&'static str] = &[
        "product",
        "treatment",
        "therapy",
        "medicine",
        "supplement",
        "side effect",
        "symptom",
        "pain",
        "fatigue",
        "nausea",
        "medication",
        "dosage",
        "relief",
        "help with",
        "recommend",
    ];

    const DOCUMENT_KEYWORDS: &'static [&'static str] = &[
        "cancer",
        "tumor",
        "oncology",
        "diagnosis",
        "prognosis",
        "stage",
        "grade",
        "chemotherapy",
        "radiation",
        "surgery",
        "explain",
        "what is",
        "how does",
        "information",
        "education",
    ];

    const REPORT_KEYWORDS: &'static [&'static str] = &[
        "report",
        "test",
        "result",
        "lab",
        "scan",
        "analysis",
        "blood",
        "urine",
        "biopsy",
        "pathology",
        "finding",
        "abnormal",
        "normal",
        "level",
        "value",
        "upload",
        "file",
        "document",
        "prescription",
        "discharge",
    ];

    /// Keywords that make an older message relevant to a destination.
    pub fn relevance_keywords(destination: Destination) -> &'static [&'static str] {
        match destination {
            Destination::Product => Self::PRODUCT_KEYWORDS,
            Destination::Document => Self::DOCUMENT_KEYWORDS,
            Destination::Report => Self::REPORT_KEYWORDS,
        }
    }

    /// Terms mined from a background summary for query expansion.
    pub fn summary_terms() -> impl Iterator<Item = &'static str> {
        Self::CONDITIONS
            .iter()
            .chain(Self::SYMPTOMS)
            .chain(Self::CANCER_TYPES)
            .copied()
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Word position of the first match of `term` in `words`.
fn first_match(words: &[String], term: &str) -> Option<usize> {
    let parts: Vec<&str> = term.split_whitespace().collect();
    let (last, init) = parts.split_last()?;
    if words.len() < parts.len() {
        return None;
    }
    (0..=words.len() - parts.len()).find(|&start| {
        init.iter()
            .enumerate()
            .all(|(i, part)| words[start + i] == *part)
            && {
                let word = &words[start + init.len()];
                word == last || word.strip_suffix('s') == Some(*last)
            }
    })
}

/// Whether `text` mentions `term`.
pub fn contains_term(text: &str, term: &str) -> bool {
    first_match(&words(text), term).is_some()
}

/// Whether `text` mentions any of `terms`.
pub fn contains_any(text: &str, terms: &[&str]) -> bool {
    let words = words(text);
    terms.iter().any(|t| first_match(&words, t).is_some())
}

/// The `terms` mentioned in `text`, in order of first mention, without repeats.
pub fn find_terms<'a, I>(text: &str, terms: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let words = words(text);
    let mut found: Vec<(usize, usize, &'a str)> = terms
        .into_iter()
        .enumerate()
        .filter_map(|(order, term)| first_match(&words, term).map(|pos| (pos, order, term)))
        .collect();
    found.sort();
    let mut result: Vec<&'a str> = Vec::with_capacity(found.len());
    for (_, _, term) in found {
        if !result.contains(&term) {
            result.push(term);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_words_only() {
        assert!(contains_term("Severe PAIN at night", "pain"));
        assert!(!contains_term("painting helps me relax", "pain"));
        assert!(!contains_term("a latest result", "test"));
    }

    #[test]
    fn phrases_and_plurals() {
        assert!(contains_term("What are the side effects?", "side effect"));
        assert!(contains_term("Can you explain what is staging", "what is"));
        assert!(!contains_term("side of the effect", "side effect"));
        assert!(contains_term("my tests came back", "test"));
    }

    #[test]
    fn find_terms_in_mention_order() {
        let text = "Nausea after chemo, then fatigue and more nausea";
        let found = find_terms(text, Vocabulary::SYMPTOMS.iter().copied());
        assert_eq!(found, vec!["nausea", "fatigue"]);
    }

    #[test]
    fn duplicate_terms_across_lists_appear_once() {
        let text = "Chemotherapy for breast cancer";
        let found = find_terms(
            text,
            Vocabulary::CONDITIONS
                .iter()
                .chain(Vocabulary::TREATMENTS)
                .chain(Vocabulary::CANCER_TYPES)
                .copied(),
        );
        assert_eq!(found, vec!["chemotherapy", "breast", "cancer"]);
    }

    #[test]
    fn every_destination_has_keywords() {
        for destination in Destination::ALL {
            assert!(!Vocabulary::relevance_keywords(destination).is_empty());
        }
        assert!(contains_any(
            "Can you recommend something for relief?",
            Vocabulary::relevance_keywords(Destination::Product)
        ));
    }
}
