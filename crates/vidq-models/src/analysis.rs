//! Analyzer output models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A highlight detected in the analyzed content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Highlight {
    /// Unique ID within the content (1-indexed)
    pub id: u32,

    /// Highlight title
    pub title: String,

    /// Start timestamp (HH:MM:SS or HH:MM:SS.mmm)
    pub start: String,

    /// End timestamp (HH:MM:SS or HH:MM:SS.mmm)
    pub end: String,

    /// Duration in seconds
    #[serde(default)]
    pub duration: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_category: Option<String>,

    /// Reason why this segment stands out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Highlight {
    /// Create a new highlight.
    pub fn new(
        id: u32,
        title: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            start: start.into(),
            end: end.into(),
            duration: 0,
            hook_category: None,
            reason: None,
            description: None,
        }
    }
}

/// Structured content data returned by the analyzer.
///
/// Written once to a completed job and to the fingerprint cache; never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContentAnalysis {
    /// Source URL as understood by the analyzer
    pub video_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_title: Option<String>,

    /// Short summary of the content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Detected spoken language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default)]
    pub highlights: Vec<Highlight>,

    /// Region of the analyzer handle that produced this result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer_region: Option<String>,

    /// Model that produced this result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ContentAnalysis {
    pub fn new(video_url: impl Into<String>) -> Self {
        Self {
            video_url: video_url.into(),
            video_title: None,
            summary: None,
            language: None,
            highlights: Vec::new(),
            analyzer_region: None,
            model: None,
        }
    }

    /// Attach a highlight.
    pub fn with_highlight(mut self, highlight: Highlight) -> Self {
        self.highlights.push(highlight);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_analyzer_schema_with_missing_optionals() {
        let json = r#"{
            "video_url": "https://youtu.be/dQw4w9WgXcQ",
            "video_title": "Title",
            "highlights": [
                {"id": 1, "title": "Hook", "start": "00:00:05", "end": "00:00:40"}
            ]
        }"#;
        let analysis: ContentAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.highlights.len(), 1);
        assert_eq!(analysis.highlights[0].duration, 0);
        assert!(analysis.summary.is_none());
    }
}
