//! Uploaded documents and their structured analysis.
//!
//! A report moves through `PENDING → PROCESSING → {COMPLETED, FAILED}` and
//! never returns to PENDING. Its category starts at the catch-all
//! [`ReportCategory::Others`] and is assigned once, when analysis completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed set of document categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportCategory {
    InsuranceDocument,
    InvestigationsReports,
    PrescriptionsProtocols,
    CostEstimate,
    DischargeSummary,
    #[default]
    Others,
}

impl ReportCategory {
    pub const ALL: [ReportCategory; 6] = [
        Self::InsuranceDocument,
        Self::InvestigationsReports,
        Self::PrescriptionsProtocols,
        Self::CostEstimate,
        Self::DischargeSummary,
        Self::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsuranceDocument => "INSURANCE_DOCUMENT",
            Self::InvestigationsReports => "INVESTIGATIONS_REPORTS",
            Self::PrescriptionsProtocols => "PRESCRIPTIONS_PROTOCOLS",
            Self::CostEstimate => "COST_ESTIMATE",
            Self::DischargeSummary => "DISCHARGE_SUMMARY",
            Self::Others => "OTHERS",
        }
    }

    /// Case-insensitive parse; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }

    /// Parse with the catch-all as fallback.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Folder name used when relocating stored files.
    pub fn folder(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl std::fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis lifecycle of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving from `self` to `next` respects the one-way lifecycle.
    pub fn can_transition_to(&self, next: AnalysisStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One measured value extracted from a report.
///
/// Model replies are loose about types: any field may be null or a number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabValue {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub unit: String,
    /// Reference range
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub normal: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
}

fn scalar_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Accept numbers as well as strings; null becomes empty.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value).unwrap_or_default())
}

fn lenient_opt_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(scalar_to_string(value).filter(|s| !s.is_empty()))
}

/// A list of strings that may arrive as null, a bare string or mixed scalars.
fn lenient_strings<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(items) => {
            items.into_iter().filter_map(scalar_to_string).collect()
        }
        serde_json::Value::String(s) => vec![s],
        _ => Vec::new(),
    })
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unknown or missing categories fall back to the catch-all.
fn lenient_category<'de, D>(deserializer: D) -> std::result::Result<ReportCategory, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .map(ReportCategory::parse_or_default)
        .unwrap_or_default())
}

/// Structured output of one analysis call (or a combination of several).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    #[serde(default, deserialize_with = "lenient_category")]
    pub category: ReportCategory,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub key_findings: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub recommendations: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub lab_values: Vec<LabValue>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub abnormal_findings: Vec<String>,
}

/// A file handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(original_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// One uploaded document and its analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub original_name: String,
    /// File store reference
    pub storage_ref: String,
    pub file_size: u64,
    pub mime_type: String,
    pub category: ReportCategory,
    pub status: AnalysisStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub lab_values: Vec<LabValue>,
    #[serde(default)]
    pub abnormal_findings: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// A freshly uploaded report awaiting analysis.
    pub fn pending(
        user_id: impl Into<String>,
        session_id: Option<String>,
        upload: &Upload,
        storage_ref: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            session_id,
            original_name: upload.original_name.clone(),
            storage_ref: storage_ref.into(),
            file_size: upload.size(),
            mime_type: upload.mime_type.clone(),
            category: ReportCategory::Others,
            status: AnalysisStatus::Pending,
            summary: None,
            key_findings: Vec::new(),
            recommendations: Vec::new(),
            lab_values: Vec::new(),
            abnormal_findings: Vec::new(),
            uploaded_at: now,
            updated_at: now,
        }
    }

    /// Status view without storage details.
    pub fn status_view(&self) -> ReportStatus {
        ReportStatus {
            id: self.id.clone(),
            status: self.status,
            summary: self.summary.clone(),
            key_findings: self.key_findings.clone(),
            recommendations: self.recommendations.clone(),
            lab_values: self.lab_values.clone(),
            abnormal_findings: self.abnormal_findings.clone(),
            uploaded_at: self.uploaded_at,
            original_name: self.original_name.clone(),
        }
    }
}

/// What pollers see of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportStatus {
    pub id: String,
    pub status: AnalysisStatus,
    pub summary: Option<String>,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub lab_values: Vec<LabValue>,
    pub abnormal_findings: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
    pub original_name: String,
}

/// Filter for listing a user's reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportQuery {
    pub category: Option<ReportCategory>,
    pub status: Option<AnalysisStatus>,
    pub uploaded_after: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl ReportQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn completed(limit: usize) -> Self {
        Self {
            status: Some(AnalysisStatus::Completed),
            limit,
            ..Self::default()
        }
    }

    /// Whether a report passes the filters (ignores paging).
    pub fn matches(&self, report: &Report) -> bool {
        self.category.is_none_or(|c| report.category == c)
            && self.status.is_none_or(|s| report.status == s)
            && self.uploaded_after.is_none_or(|t| report.uploaded_at >= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_is_lenient() {
        assert_eq!(
            ReportCategory::parse("investigations_reports"),
            Some(ReportCategory::InvestigationsReports)
        );
        assert_eq!(
            ReportCategory::parse(" Discharge Summary "),
            Some(ReportCategory::DischargeSummary)
        );
        assert_eq!(ReportCategory::parse_or_default("BLOOD"), ReportCategory::Others);
    }

    #[test]
    fn status_transitions_are_one_way() {
        use AnalysisStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn analysis_deserializes_camel_case() {
        let json = r#"{
            "category": "INVESTIGATIONS_REPORTS",
            "summary": "Mild anaemia",
            "keyFindings": ["Low haemoglobin"],
            "labValues": [{"name": "Hb", "value": 9.8, "unit": "g/dL", "normal": "12-16", "status": "Low"}]
        }"#;
        let analysis: Analysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.category, ReportCategory::InvestigationsReports);
        assert_eq!(analysis.key_findings, vec!["Low haemoglobin"]);
        assert_eq!(analysis.lab_values[0].value, "9.8");
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn analysis_tolerates_nulls_and_numbers() {
        let json = r#"{
            "category": "INVESTIGATIONS_REPORTS",
            "summary": "Thyroid panel",
            "keyFindings": null,
            "recommendations": "Repeat TSH in 6 weeks",
            "abnormalFindings": ["High TSH", null, 7.2],
            "labValues": [{"name": "TSH", "value": 7.2, "unit": null, "normal": 4.5, "status": null}]
        }"#;
        let analysis: Analysis = serde_json::from_str(json).unwrap();
        assert!(analysis.key_findings.is_empty());
        assert_eq!(analysis.recommendations, vec!["Repeat TSH in 6 weeks"]);
        assert_eq!(analysis.abnormal_findings, vec!["High TSH", "7.2"]);
        let lab = &analysis.lab_values[0];
        assert_eq!(lab.unit, "");
        assert_eq!(lab.normal.as_deref(), Some("4.5"));
        assert_eq!(lab.status, "");

        let analysis: Analysis =
            serde_json::from_str(r#"{"summary": null, "labValues": null}"#).unwrap();
        assert_eq!(analysis.summary, None);
        assert!(analysis.lab_values.is_empty());
    }

    #[test]
    fn unknown_category_falls_back_to_others() {
        let analysis: Analysis =
            serde_json::from_str(r#"{"category": "Blood Work", "summary": "ok"}"#).unwrap();
        assert_eq!(analysis.category, ReportCategory::Others);
    }

    #[test]
    fn pending_report_uses_catch_all_category() {
        let upload = Upload::new("cbc.pdf", "application/pdf", vec![0; 10]);
        let report = Report::pending("u1", None, &upload, "pending/cbc.pdf");
        assert_eq!(report.category, ReportCategory::Others);
        assert_eq!(report.status, AnalysisStatus::Pending);
        assert_eq!(report.file_size, 10);
    }

    #[test]
    fn report_query_filters() {
        let upload = Upload::new("a.txt", "text/plain", vec![]);
        let mut report = Report::pending("u1", None, &upload, "a.txt");
        assert!(ReportQuery::recent(10).matches(&report));
        assert!(!ReportQuery::completed(10).matches(&report));
        report.status = AnalysisStatus::Completed;
        assert!(ReportQuery::completed(10).matches(&report));
    }
}
