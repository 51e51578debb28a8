//! Prompt text for the analysis calls.

use carebridge_core::report::ReportCategory;

const SYSTEM: &str = "You are a medical document analyst. You read lab reports, \
prescriptions, discharge summaries and related paperwork and answer with a single JSON \
object only. Do not invent values that are not present in the document.";

const SCHEMA: &str = r#"{
  "category": "one of the categories above",
  "summary": "Brief 10-15 sentence summary",
  "keyFindings": ["finding"],
  "recommendations": ["recommendation"],
  "labValues": [{"name": "", "value": "", "unit": "", "normal": "", "status": "Normal|Low|High|Abnormal"}],
  "abnormalFindings": ["finding"]
}"#;

const CHUNK_SCHEMA: &str = r#"{
  "summary": "Brief summary of this section",
  "keyFindings": ["finding"],
  "recommendations": ["recommendation"],
  "labValues": [{"name": "", "value": "", "unit": "", "normal": "", "status": ""}],
  "abnormalFindings": ["finding"]
}"#;

pub fn system() -> &'static str {
    SYSTEM
}

fn category_list() -> String {
    ReportCategory::ALL
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whole-document analysis.
pub fn document(text: &str) -> String {
    format!(
        "Analyze this medical document and categorize it into one of:\n{}\n\n\
         Respond with JSON in exactly this shape:\n{SCHEMA}\n\nDocument:\n{text}",
        category_list()
    )
}

/// One section of a chunked document. Only the first chunk assigns a category.
pub fn chunk(text: &str, index: usize, total: usize) -> String {
    if index == 0 {
        format!(
            "Analyze this section ({}/{total}) of a medical document. Categorize the \
             document into one of:\n{}\n\nRespond with JSON in exactly this shape:\n{SCHEMA}\n\n\
             Section:\n{text}",
            index + 1,
            category_list()
        )
    } else {
        format!(
            "Analyze this section ({}/{total}) of a medical document.\n\n\
             Respond with JSON in exactly this shape:\n{CHUNK_SCHEMA}\n\nSection:\n{text}",
            index + 1
        )
    }
}

/// Instructions sent next to an inline image.
pub fn image() -> String {
    format!(
        "Analyze this medical image or scanned document and categorize it into one of:\n{}\n\n\
         Extract every readable lab value. Respond with JSON in exactly this shape:\n{SCHEMA}",
        category_list()
    )
}

/// Cheaper-tier analysis of a small text sample.
pub fn fallback_text(original_name: &str, sample: &str) -> String {
    format!(
        "Analyze this small sample from medical document \"{original_name}\". Categorize it \
         into one of:\n{}\n\nRespond with brief JSON in this shape:\n{SCHEMA}\n\nSample:\n{sample}",
        category_list()
    )
}

/// Cheaper-tier analysis of an image.
pub fn fallback_image(original_name: &str) -> String {
    format!(
        "Briefly analyze the medical image \"{original_name}\". Categorize it into one of:\n{}\n\n\
         Respond with brief JSON in this shape:\n{SCHEMA}",
        category_list()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_chunk_asks_for_category() {
        let first = chunk("text", 0, 3);
        let later = chunk("text", 2, 3);
        assert!(first.contains("(1/3)"));
        assert!(first.contains("INVESTIGATIONS_REPORTS"));
        assert!(later.contains("(3/3)"));
        assert!(!later.contains("\"category\""));
    }

    #[test]
    fn document_prompt_lists_every_category() {
        let prompt = document("Hb 9.8");
        for category in ReportCategory::ALL {
            assert!(prompt.contains(category.as_str()));
        }
        assert!(prompt.ends_with("Hb 9.8"));
    }
}
