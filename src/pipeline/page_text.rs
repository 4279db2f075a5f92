//! Parse result schema and text/markdown assembly.
//!
//! The parse service does not always fill the same page fields. Instead of
//! probing for whatever is present, each output is produced by an ordered
//! list of sources; the first one that yields non-empty content for a page
//! wins.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Parsed content of a whole document, page by page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDocument {
    #[serde(default)]
    pub pages: Vec<ParsedPage>,
}

/// One parsed page. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub md: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default, alias = "text_blocks")]
    pub items: Vec<PageItem>,
}

/// A layout block inside a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageItem {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl PageItem {
    fn content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(self.value.as_deref())
    }
}

/// Where a page's plain text comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// The page-level `text` field.
    Text,
    /// The page's layout items, one per line.
    Items,
}

/// Where a page's markdown comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkdownSource {
    Md,
    Markdown,
}

pub const TEXT_SOURCES: [TextSource; 2] = [TextSource::Text, TextSource::Items];
pub const MARKDOWN_SOURCES: [MarkdownSource; 2] = [MarkdownSource::Md, MarkdownSource::Markdown];

impl TextSource {
    pub fn extract(&self, page: &ParsedPage) -> Option<String> {
        match self {
            TextSource::Text => non_empty(page.text.as_deref()),
            TextSource::Items => {
                let lines: Vec<&str> = page
                    .items
                    .iter()
                    .filter_map(PageItem::content)
                    .filter(|t| !t.is_empty())
                    .collect();
                if lines.is_empty() {
                    None
                } else {
                    Some(lines.join("\n"))
                }
            }
        }
    }
}

impl MarkdownSource {
    pub fn extract(&self, page: &ParsedPage) -> Option<String> {
        match self {
            MarkdownSource::Md => non_empty(page.md.as_deref()),
            MarkdownSource::Markdown => non_empty(page.markdown.as_deref()),
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|s| !s.is_empty()).map(str::to_string)
}

/// Text and markdown of a whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledText {
    pub text: String,
    pub markdown: String,
    pub pages: usize,
}

/// Join per-page content with blank lines using the default source order.
///
/// Zero pages, or pages with neither text nor markdown, is a
/// [`PipelineError::ParseFailed`].
pub fn assemble(doc: &ParsedDocument) -> Result<AssembledText, PipelineError> {
    assemble_with(doc, &TEXT_SOURCES, &MARKDOWN_SOURCES)
}

pub fn assemble_with(
    doc: &ParsedDocument,
    text_sources: &[TextSource],
    markdown_sources: &[MarkdownSource],
) -> Result<AssembledText, PipelineError> {
    if doc.pages.is_empty() {
        return Err(PipelineError::ParseFailed {
            detail: "parser returned no pages".into(),
        });
    }

    let text = join_pages(doc, |page| {
        text_sources.iter().find_map(|s| s.extract(page))
    });
    let markdown = join_pages(doc, |page| {
        markdown_sources.iter().find_map(|s| s.extract(page))
    });

    if text.is_empty() && markdown.is_empty() {
        return Err(PipelineError::ParseFailed {
            detail: format!("parser returned {} pages without content", doc.pages.len()),
        });
    }

    Ok(AssembledText {
        text,
        markdown,
        pages: doc.pages.len(),
    })
}

fn join_pages(doc: &ParsedDocument, pick: impl Fn(&ParsedPage) -> Option<String>) -> String {
    doc.pages
        .iter()
        .filter_map(pick)
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}
