//! Segment extraction: copy selected pages of a source PDF into a new file.
//!
//! ## Page tree rewrite
//!
//! Instead of deleting the unwanted pages, the extractor builds a fresh flat
//! page tree whose kids are copies of the requested page dictionaries, in
//! the requested order. Copies share content streams and resources with the
//! original, so a page requested twice costs one small dictionary. Attributes
//! a page inherits from its ancestors (`Resources`, `MediaBox`, `CropBox`,
//! `Rotate`) are copied onto the page itself before the old tree is pruned.
//!
//! lopdf is synchronous; [`SegmentExtractor::extract_async`] runs it on the
//! blocking pool.

use crate::error::PipelineError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// File-name prefix of every temporary segment artifact.
pub const ARTIFACT_PREFIX: &str = "temp_segment_";

/// Page attributes that may live on an ancestor `Pages` node.
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Guard against cyclic `Parent` chains in damaged files.
const MAX_TREE_DEPTH: usize = 64;

/// A temporary PDF holding exactly one segment's pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentArtifact {
    pub path: PathBuf,
    /// Pages actually written.
    pub page_count: usize,
    /// Requested page numbers that were outside the source document.
    pub skipped_pages: Vec<i64>,
}

/// Writes segment artifacts into one output directory.
#[derive(Debug, Clone)]
pub struct SegmentExtractor {
    output_dir: PathBuf,
}

impl SegmentExtractor {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write the pages `pages` (1-based, order and duplicates preserved) of
    /// `source` to a new artifact named after `segment_name`.
    ///
    /// Out-of-range page numbers are skipped. Fails when the source cannot
    /// be loaded or no requested page is in range.
    pub fn extract(
        &self,
        source: &Path,
        pages: &[i64],
        segment_name: &str,
    ) -> Result<SegmentArtifact, PipelineError> {
        let extraction_error = |detail: String| PipelineError::Extraction {
            path: source.to_path_buf(),
            detail,
        };

        let mut doc = Document::load(source)
            .map_err(|e| extraction_error(format!("cannot open PDF: {e}")))?;

        let page_ids = doc.get_pages();
        let total = page_ids.len();
        let (selected, skipped) = select_pages(pages, total);

        if !skipped.is_empty() {
            warn!(
                "Segment {}: skipping pages {:?} (document has {} pages)",
                segment_name, skipped, total
            );
        }
        if selected.is_empty() {
            return Err(extraction_error(format!(
                "none of the pages {pages:?} is within 1..={total}"
            )));
        }

        let ids: Vec<ObjectId> = selected
            .iter()
            .filter_map(|n| page_ids.get(&(*n as u32)).copied())
            .collect();

        rebuild_page_tree(&mut doc, &ids)
            .map_err(|e| extraction_error(format!("cannot rebuild page tree: {e}")))?;

        let path = self.output_dir.join(artifact_file_name(segment_name));
        doc.save(&path)
            .map_err(|e| extraction_error(format!("cannot write {}: {e}", path.display())))?;

        debug!(
            "Segment {}: wrote {} pages to {}",
            segment_name,
            ids.len(),
            path.display()
        );

        Ok(SegmentArtifact {
            path,
            page_count: ids.len(),
            skipped_pages: skipped,
        })
    }

    /// [`extract`](Self::extract) on the blocking thread pool.
    pub async fn extract_async(
        &self,
        source: &Path,
        pages: &[i64],
        segment_name: &str,
    ) -> Result<SegmentArtifact, PipelineError> {
        let this = self.clone();
        let source = source.to_path_buf();
        let pages = pages.to_vec();
        let name = segment_name.to_string();

        tokio::task::spawn_blocking(move || this.extract(&source, &pages, &name))
            .await
            .map_err(|e| PipelineError::Internal(format!("Extraction task panicked: {e}")))?
    }
}

/// Split requested 1-based page numbers into in-range pages (order and
/// duplicates kept) and skipped numbers.
pub fn select_pages(requested: &[i64], total: usize) -> (Vec<usize>, Vec<i64>) {
    let mut selected = Vec::with_capacity(requested.len());
    let mut skipped = Vec::new();
    for &p in requested {
        if p >= 1 && (p as u64) <= total as u64 {
            selected.push(p as usize);
        } else {
            skipped.push(p);
        }
    }
    (selected, skipped)
}

/// `temp_segment_{name}_{8 hex}.pdf`, with the name reduced to
/// alphanumerics, `_` and `-`.
pub fn artifact_file_name(segment_name: &str) -> String {
    let safe: String = segment_name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{ARTIFACT_PREFIX}{safe}_{}.pdf", &suffix[..8])
}

/// Point the catalog at a new flat page tree made of copies of `page_ids`.
fn rebuild_page_tree(doc: &mut Document, page_ids: &[ObjectId]) -> Result<(), lopdf::Error> {
    let pages_id = doc.new_object_id();

    let mut kids = Vec::with_capacity(page_ids.len());
    for &id in page_ids {
        let mut page = doc.get_object(id)?.as_dict()?.clone();
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Some(value) = inherited_attribute(doc, id, key) {
                    page.set(key.to_vec(), value);
                }
            }
        }
        page.set("Parent", Object::Reference(pages_id));
        kids.push(Object::Reference(doc.add_object(page)));
    }

    let mut pages = Dictionary::new();
    pages.set("Type", Object::Name(b"Pages".to_vec()));
    pages.set("Count", Object::Integer(kids.len() as i64));
    pages.set("Kids", Object::Array(kids));
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let root_id = doc.trailer.get(b"Root")?.as_reference()?;
    let catalog = doc.get_object_mut(root_id)?.as_dict_mut()?;
    catalog.set("Pages", Object::Reference(pages_id));
    // Outline destinations point at the old page objects.
    catalog.remove(b"Outlines");

    doc.prune_objects();
    doc.renumber_objects();
    Ok(())
}

fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut node = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        let parent_id = node.get(b"Parent").ok()?.as_reference().ok()?;
        let parent = doc.get_object(parent_id).ok()?.as_dict().ok()?;
        if let Ok(value) = parent.get(key) {
            return Some(value.clone());
        }
        node = parent;
    }
    None
}
