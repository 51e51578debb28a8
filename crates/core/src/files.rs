//! FileStore trait: where uploaded bytes live.

use async_trait::async_trait;

use crate::error::FileStoreError;

/// Opaque storage for uploaded documents.
///
/// References are relative paths like `pending/<uuid>-scan.pdf`; relocation
/// moves a file under another top-level folder and returns the new reference.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Persist `bytes`, using `file_name` as a naming hint. Returns the reference.
    async fn save(&self, file_name: &str, bytes: &[u8]) -> Result<String, FileStoreError>;

    async fn read(&self, reference: &str) -> Result<Vec<u8>, FileStoreError>;

    /// Move a stored file under `folder`, returning its new reference.
    async fn relocate(&self, reference: &str, folder: &str) -> Result<String, FileStoreError>;

    async fn delete(&self, reference: &str) -> Result<(), FileStoreError>;
}

/// Keep only characters that are safe in a file name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}

/// The file-name part of a reference.
pub fn reference_file_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_file_name("blood test (1).pdf"), "blood_test__1_.pdf");
        assert_eq!(sanitize_file_name("..."), "upload");
    }

    #[test]
    fn file_name_of_reference() {
        assert_eq!(reference_file_name("pending/abc-scan.pdf"), "abc-scan.pdf");
        assert_eq!(reference_file_name("scan.pdf"), "scan.pdf");
    }
}
