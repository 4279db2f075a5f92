//! Source-document discovery and validation.
//!
//! Sources are the `*.pdf` / `*.PDF` files directly inside the data
//! directory. Temporary segment artifacts live in the same directory by
//! default and are never treated as sources.

use crate::error::PipelineError;
use crate::pipeline::extract::ARTIFACT_PREFIX;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Whether `name` has a `.pdf` extension, in any case.
pub fn is_pdf_name(name: &str) -> bool {
    name.to_lowercase().ends_with(".pdf")
}

/// Whether `name` is a PDF and not a segment artifact.
pub fn is_source_pdf(name: &str) -> bool {
    is_pdf_name(name) && !name.starts_with(ARTIFACT_PREFIX)
}

/// Filenames of all source PDFs in `data_dir`, sorted case-insensitively.
///
/// Two names that differ only in case are listed once (first one wins), the
/// way a case-insensitive file system would present them.
pub async fn list_source_names(data_dir: &Path) -> Result<Vec<String>, PipelineError> {
    let mut entries = tokio::fs::read_dir(data_dir)
        .await
        .map_err(|e| PipelineError::persistence(data_dir, e))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PipelineError::persistence(data_dir, e))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_file && is_source_pdf(&name) {
            names.push(name);
        }
    }

    names.sort_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then(a.cmp(b)));
    let mut seen = HashSet::new();
    names.retain(|n| seen.insert(n.to_lowercase()));
    debug!("Found {} source PDFs in {}", names.len(), data_dir.display());
    Ok(names)
}

/// Lower-case and fold German umlauts and common accents, so that names
/// mangled by uploads or archive tools still match.
pub fn normalize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            'ä' | 'à' | 'á' | 'â' | 'ã' => out.push('a'),
            'ö' => out.push('o'),
            'ü' => out.push('u'),
            'é' | 'è' | 'ê' | 'ë' => out.push('e'),
            'ç' => out.push('c'),
            'ñ' => out.push('n'),
            'ß' => out.push_str("ss"),
            other => out.push(other),
        }
    }
    out
}

/// Find `wanted` among `present`: exact match first, then normalised.
pub fn find_source_name<'a>(present: &'a [String], wanted: &str) -> Option<&'a String> {
    let wanted = Path::new(wanted)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| wanted.to_string());

    present.iter().find(|p| **p == wanted).or_else(|| {
        let normalized = normalize_filename(&wanted);
        present.iter().find(|p| normalize_filename(p) == normalized)
    })
}

/// Check that `path` exists, is readable and starts with `%PDF`.
pub fn validate_pdf(path: &Path) -> Result<(), PipelineError> {
    let mut f = std::fs::File::open(path).map_err(|_| PipelineError::NotAPdf {
        path: path.to_path_buf(),
    })?;
    let mut magic = [0u8; 4];
    if f.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(PipelineError::NotAPdf {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn source_filter_skips_artifacts_and_other_files() {
        assert!(is_source_pdf("a.pdf"));
        assert!(is_source_pdf("B.PDF"));
        assert!(!is_source_pdf("notes.txt"));
        assert!(!is_source_pdf("temp_segment_invoice_1_abcd1234.pdf"));
    }

    #[test]
    fn normalize_folds_case_and_umlauts() {
        assert_eq!(normalize_filename("Übergabe_Straße.PDF"), "ubergabe_strasse.pdf");
        assert_eq!(normalize_filename("Café.pdf"), "cafe.pdf");
    }

    #[test]
    fn find_prefers_exact_then_normalised() {
        let present = vec!["Übergabe.pdf".to_string(), "ubergabe.pdf".to_string()];
        assert_eq!(find_source_name(&present, "ubergabe.pdf").unwrap(), "ubergabe.pdf");

        let present = vec!["Übergabe.pdf".to_string()];
        assert_eq!(find_source_name(&present, "UBERGABE.pdf").unwrap(), "Übergabe.pdf");
        assert_eq!(find_source_name(&present, "uploads/Übergabe.pdf").unwrap(), "Übergabe.pdf");
        assert!(find_source_name(&present, "other.pdf").is_none());
    }

    #[tokio::test]
    async fn listing_is_sorted_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        for name in ["b.pdf", "A.PDF", "temp_segment_x_1.pdf", "readme.md"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4").unwrap();
        }
        std::fs::create_dir(dir.path().join("folder.pdf")).unwrap();

        let names = list_source_names(dir.path()).await.unwrap();
        assert_eq!(names, vec!["A.PDF".to_string(), "b.pdf".to_string()]);
    }

    #[test]
    fn validate_rejects_non_pdf() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        std::fs::write(&good, b"%PDF-1.7\n").unwrap();
        std::fs::write(&bad, b"hello").unwrap();

        assert!(validate_pdf(&good).is_ok());
        assert!(matches!(validate_pdf(&bad), Err(PipelineError::NotAPdf { .. })));
        assert!(validate_pdf(&dir.path().join("missing.pdf")).is_err());
    }
}
