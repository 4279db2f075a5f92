//! Result types written to and read from the durable records.
//!
//! The serialised field names (`name`, `category`, `pages`,
//! `confidence_category`, `parsed`) are the contract with the web front end
//! and must not change.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Segment lists keyed by source filename (`split_results.json`).
pub type SplitResults = BTreeMap<String, Vec<Segment>>;

/// Parsed segment lists keyed by source filename (`parsed_segments.json`).
pub type ParsedResults = BTreeMap<String, Vec<ParsedSegment>>;

/// A named, categorised run of pages inside one source document.
///
/// `pages` are 1-based, in the order the splitter reported them, and may be
/// non-contiguous. They are kept as signed integers so that a bogus value
/// from the remote side (0, negative) survives a round trip through the
/// record and is skipped at extraction time instead of poisoning the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// `{category}_{n}`, unique within its document.
    pub name: String,
    pub category: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pages: Vec<i64>,
    #[serde(default)]
    pub confidence_category: Option<String>,
}

/// The splitter may report `"pages": null`; treat it like an empty list.
pub(crate) fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<i64>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Segment {
    pub fn confidence_or_unknown(&self) -> &str {
        self.confidence_category.as_deref().unwrap_or("unknown")
    }
}

/// A [`Segment`] together with the outcome of parsing its pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedSegment {
    pub name: String,
    pub category: String,
    pub pages: Vec<i64>,
    pub confidence_category: String,
    pub parsed: ParseOutcome,
}

impl ParsedSegment {
    pub fn new(segment: &Segment, parsed: ParseOutcome) -> Self {
        Self {
            name: segment.name.clone(),
            category: segment.category.clone(),
            pages: segment.pages.clone(),
            confidence_category: segment.confidence_or_unknown().to_string(),
            parsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.parsed, ParseOutcome::Parsed { .. })
    }
}

/// Either the full parse payload or exactly an error message, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParseOutcome {
    Parsed {
        text: String,
        markdown: String,
        num_pages_parsed: usize,
    },
    Failed {
        error: String,
    },
}

impl ParseOutcome {
    pub fn failed(error: impl ToString) -> Self {
        ParseOutcome::Failed {
            error: error.to_string(),
        }
    }
}

/// Outcome of one split-stage run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitReport {
    pub results: SplitResults,
    pub succeeded: usize,
    pub failed: usize,
    /// The run stopped early; `results` covers only the finished documents.
    #[serde(default)]
    pub cancelled: bool,
}

impl SplitReport {
    pub fn total_documents(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn total_segments(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }
}

/// Outcome of one parse-stage run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseReport {
    pub results: ParsedResults,
    pub summary: ParseSummary,
    /// The run stopped early; `results` covers only the finished documents.
    #[serde(default)]
    pub cancelled: bool,
}

/// Segment and artifact counters printed at the end of a parse run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseSummary {
    pub total_segments: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub artifacts_created: usize,
    pub artifacts_removed: usize,
}

impl ParseSummary {
    /// Count outcomes in `results`. `total` is the number of segments the
    /// split results announced, which includes segments of documents whose
    /// source went missing.
    pub fn from_results(results: &ParsedResults, total: usize) -> Self {
        let succeeded = results
            .values()
            .flatten()
            .filter(|s| s.is_success())
            .count();
        Self {
            total_segments: total,
            succeeded,
            failed: total.saturating_sub(succeeded),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice() -> Segment {
        Segment {
            name: "invoice_1".into(),
            category: "invoice".into(),
            pages: vec![1, 2],
            confidence_category: Some("high".into()),
        }
    }

    #[test]
    fn segment_matches_record_shape() {
        let v = serde_json::to_value(invoice()).unwrap();
        assert_eq!(
            v,
            json!({"name":"invoice_1","category":"invoice","pages":[1,2],"confidence_category":"high"})
        );
    }

    #[test]
    fn segment_tolerates_missing_optional_fields() {
        let s: Segment =
            serde_json::from_value(json!({"name":"x_1","category":"x","pages":null})).unwrap();
        assert!(s.pages.is_empty());
        assert_eq!(s.confidence_or_unknown(), "unknown");

        let s: Segment = serde_json::from_value(json!({"name":"x_1","category":"x"})).unwrap();
        assert!(s.pages.is_empty());
    }

    #[test]
    fn parsed_outcome_serialises_flat() {
        let ok = ParsedSegment::new(
            &invoice(),
            ParseOutcome::Parsed {
                text: "Total 10".into(),
                markdown: "# Invoice".into(),
                num_pages_parsed: 2,
            },
        );
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["parsed"]["text"], "Total 10");
        assert_eq!(v["parsed"]["num_pages_parsed"], 2);
        assert!(v["parsed"].get("error").is_none());

        let err = ParsedSegment::new(&invoice(), ParseOutcome::failed("boom"));
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["parsed"], json!({"error": "boom"}));
    }

    #[test]
    fn parsed_outcome_deserialises_both_variants() {
        let ok: ParseOutcome =
            serde_json::from_value(json!({"text":"a","markdown":"b","num_pages_parsed":1}))
                .unwrap();
        assert!(matches!(ok, ParseOutcome::Parsed { .. }));
        let err: ParseOutcome = serde_json::from_value(json!({"error":"x"})).unwrap();
        assert_eq!(err, ParseOutcome::failed("x"));
    }

    #[test]
    fn summary_counts_missing_documents_as_failed() {
        let mut results = ParsedResults::new();
        results.insert(
            "a.pdf".into(),
            vec![
                ParsedSegment::new(
                    &invoice(),
                    ParseOutcome::Parsed {
                        text: "t".into(),
                        markdown: "m".into(),
                        num_pages_parsed: 2,
                    },
                ),
                ParsedSegment::new(&invoice(), ParseOutcome::failed("bad pages")),
            ],
        );
        results.insert("gone.pdf".into(), vec![]);
        let summary = ParseSummary::from_results(&results, 4);
        assert_eq!(summary.total_segments, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 3);
    }
}
