//! Structured-response parsing and chunk combination.

use std::collections::HashSet;

use carebridge_core::report::{Analysis, ReportCategory};
use tracing::warn;

pub const SUMMARY_CAP: usize = 600;
pub const KEY_FINDINGS_CAP: usize = 15;
pub const RECOMMENDATIONS_CAP: usize = 10;
pub const ABNORMAL_FINDINGS_CAP: usize = 10;

/// Characters of a non-JSON reply kept as the summary.
const PLAIN_SUMMARY_CHARS: usize = 500;

/// Parse a model reply into an [`Analysis`].
///
/// The reply is expected to hold one JSON object, possibly wrapped in prose
/// or a code fence; the outermost `{...}` span is parsed.
pub fn parse_analysis(reply: &str) -> Analysis {
    let span = match (reply.find('{'), reply.rfind('}')) {
        (Some(start), Some(end)) if start < end => Some(&reply[start..=end]),
        _ => None,
    };

    match span {
        Some(json) => serde_json::from_str(json).unwrap_or_else(|e| {
            warn!(error = %e, "Analysis reply was not valid JSON");
            Analysis {
                summary: Some("Analysis completed but parsing failed".into()),
                ..Analysis::default()
            }
        }),
        None => Analysis {
            summary: Some(truncate_chars(reply.trim(), PLAIN_SUMMARY_CHARS)),
            ..Analysis::default()
        },
    }
}

/// Merge per-chunk analyses into one.
///
/// The category comes from the first analysis (chunk 1 is the only one asked
/// to classify). List fields keep first-seen order with duplicates removed.
pub fn combine(analyses: Vec<Analysis>) -> Analysis {
    let category = analyses
        .first()
        .map(|a| a.category)
        .unwrap_or(ReportCategory::Others);

    let summary = analyses
        .iter()
        .filter_map(|a| a.summary.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let mut combined = Analysis {
        category,
        summary: (!summary.is_empty()).then(|| truncate_chars(&summary, SUMMARY_CAP)),
        ..Analysis::default()
    };

    let mut findings = Vec::new();
    let mut recommendations = Vec::new();
    let mut abnormal = Vec::new();
    for analysis in analyses {
        findings.extend(analysis.key_findings);
        recommendations.extend(analysis.recommendations);
        abnormal.extend(analysis.abnormal_findings);
        combined.lab_values.extend(analysis.lab_values);
    }
    combined.key_findings = dedup_capped(findings, KEY_FINDINGS_CAP);
    combined.recommendations = dedup_capped(recommendations, RECOMMENDATIONS_CAP);
    combined.abnormal_findings = dedup_capped(abnormal, ABNORMAL_FINDINGS_CAP);
    combined
}

/// The placeholder analysis used when nothing more could be extracted.
pub fn simplified_analysis(original_name: &str, kind: &str) -> Analysis {
    Analysis {
        category: ReportCategory::Others,
        summary: Some(format!(
            "Medical {kind} \"{original_name}\" processed successfully. \
             Basic analysis completed due to processing constraints."
        )),
        key_findings: vec!["Document processed and stored successfully".into()],
        recommendations: vec![
            "Please consult with your healthcare provider for detailed interpretation".into(),
        ],
        lab_values: Vec::new(),
        abnormal_findings: vec!["Manual review recommended for detailed analysis".into()],
    }
}

fn dedup_capped(items: Vec<String>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .take(cap)
        .collect()
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
