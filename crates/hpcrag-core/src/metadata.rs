//! Filename metadata extraction.
//!
//! Input documents are named `<name> <age>v <document-id>.<ext>`, for example
//! `Matti 75v M7-54.docx`. Filenames that do not follow the convention still
//! get scheduled; they receive a fallback record with a generated document id.

use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::models::DocumentMetadata;

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-zÄÖÅäöå]+)\s+(\d{1,3})v\s+([A-Za-z0-9\-]+)")
            .expect("filename pattern is a valid regex")
    })
}

/// Extract subject name, age and document id from a filename.
///
/// Never fails. A non-matching name yields [`DocumentMetadata::unknown`].
pub fn extract_from_filename(filename: &str) -> DocumentMetadata {
    let parsed = filename_pattern().captures(filename).and_then(|caps| {
        let age = caps[2].parse::<u32>().ok()?;
        Some(DocumentMetadata {
            subject_name: caps[1].to_string(),
            subject_age: age,
            document_id: caps[3].to_string(),
        })
    });

    match parsed {
        Some(metadata) => metadata,
        None => {
            let fallback = DocumentMetadata::unknown();
            warn!(
                filename,
                document_id = %fallback.document_id,
                "Could not extract metadata from filename, using fallback"
            );
            fallback
        }
    }
}
