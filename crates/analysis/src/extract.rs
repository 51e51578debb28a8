//! Text extraction per media type.
//!
//! PDFs go through `pdf-extract` first; a crude byte-level strip covers
//! scanned or malformed files the extractor cannot read. Images are not
//! extracted at all, they are sent inline to a vision-capable model.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use crate::error::AnalysisError;

/// What kind of extraction a media type gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Pdf,
    Image,
    Text,
}

impl MediaKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime = mime_type.trim().to_ascii_lowercase();
        if mime == "application/pdf" {
            Some(Self::Pdf)
        } else if mime.starts_with("image/") {
            Some(Self::Image)
        } else if mime.starts_with("text/") || mime == "application/json" || mime.contains("text")
        {
            Some(Self::Text)
        } else {
            None
        }
    }
}

/// Extracted document content ready for a completion call.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentContent {
    Text(String),
    Image { data_url: String },
}

/// Extraction limits, taken from the analysis config.
#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub min_chars: usize,
    pub crude_cap: usize,
}

pub async fn extract(
    bytes: &[u8],
    mime_type: &str,
    limits: ExtractLimits,
) -> Result<DocumentContent, AnalysisError> {
    match MediaKind::from_mime(mime_type) {
        Some(MediaKind::Pdf) => extract_pdf(bytes, limits).await.map(DocumentContent::Text),
        Some(MediaKind::Image) => Ok(DocumentContent::Image {
            data_url: image_data_url(mime_type, bytes),
        }),
        Some(MediaKind::Text) => Ok(DocumentContent::Text(
            String::from_utf8_lossy(bytes).into_owned(),
        )),
        None => Err(AnalysisError::UnsupportedMediaType(mime_type.to_string())),
    }
}

async fn extract_pdf(bytes: &[u8], limits: ExtractLimits) -> Result<String, AnalysisError> {
    let owned = bytes.to_vec();
    // pdf-extract is synchronous and panics on some malformed inputs; the
    // blocking task turns a panic into a JoinError.
    let structured = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&owned))
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r.map_err(|e| e.to_string()));

    match structured {
        Ok(text) if text.trim().chars().count() >= limits.min_chars => {
            debug!(chars = text.len(), "Extracted PDF text");
            return Ok(text);
        }
        Ok(text) => {
            warn!(chars = text.trim().len(), "PDF text too short, using crude extraction");
        }
        Err(reason) => {
            warn!(error = %reason, "PDF extractor failed, using crude extraction");
        }
    }

    let crude = crude_text(bytes, limits.crude_cap);
    if crude.chars().count() < limits.min_chars {
        return Err(AnalysisError::Extraction(
            "could not extract readable text from PDF".into(),
        ));
    }
    Ok(crude)
}

/// Byte-level text recovery: control characters and anything outside
/// `[A-Za-z0-9_\s.,;:()-]` become spaces, whitespace collapses, and the
/// result is capped at `cap` characters.
pub fn crude_text(bytes: &[u8], cap: usize) -> String {
    let lossy = String::from_utf8_lossy(bytes);
    let kept: String = lossy
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric()
                || c == '_'
                || c.is_ascii_whitespace()
                || matches!(c, '.' | ',' | ';' | ':' | '(' | ')' | '-')
            {
                c
            } else {
                ' '
            }
        })
        .collect();
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(cap)
        .collect()
}

pub fn image_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: ExtractLimits = ExtractLimits {
        min_chars: 100,
        crude_cap: 8000,
    };

    #[test]
    fn media_kinds() {
        assert_eq!(MediaKind::from_mime("application/pdf"), Some(MediaKind::Pdf));
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("text/plain"), Some(MediaKind::Text));
        assert_eq!(MediaKind::from_mime("application/json"), Some(MediaKind::Text));
        assert_eq!(
            MediaKind::from_mime("application/vnd.oasis.opendocument.text"),
            Some(MediaKind::Text)
        );
        assert_eq!(MediaKind::from_mime("application/zip"), None);
    }

    #[test]
    fn crude_text_strips_binary_noise() {
        let bytes = b"%PDF-1.4\x00\x01 Hemoglobin: 9.8 g/dL\n\n(low)  \xff\xfe end";
        assert_eq!(
            crude_text(bytes, 8000),
            "PDF-1.4 Hemoglobin: 9.8 g dL (low) end"
        );
        assert_eq!(crude_text(b"abcdef", 3), "abc");
    }

    #[test]
    fn image_becomes_data_url() {
        assert_eq!(image_data_url("image/png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[tokio::test]
    async fn text_media_is_read_lossily() {
        let content = extract(b"Vitamin D: 12 ng/mL", "text/plain", LIMITS)
            .await
            .unwrap();
        assert_eq!(content, DocumentContent::Text("Vitamin D: 12 ng/mL".into()));
    }

    #[tokio::test]
    async fn unsupported_media_is_rejected() {
        let err = extract(b"PK", "application/zip", LIMITS).await.unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedMediaType(_)));
    }

    #[tokio::test]
    async fn unreadable_pdf_falls_back_to_crude_text() {
        let body = "Complete blood count. Hemoglobin 9.8 g per dL, below the reference range. \
                    Ferritin 8 ng per mL, low. Platelets within normal limits.";
        let bytes = format!("not really a pdf \x01\x02 {body}");
        let content = extract(bytes.as_bytes(), "application/pdf", LIMITS)
            .await
            .unwrap();
        match content {
            DocumentContent::Text(text) => assert!(text.contains("Ferritin 8 ng per mL")),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tiny_unreadable_pdf_fails_extraction() {
        let err = extract(b"\x00\x01garbage", "application/pdf", LIMITS)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Extraction(_)));
    }
}
