//! Scroll-anchor persistence.
//!
//! A reading position is stored as a structural selector plus a text snippet,
//! so it can be found again after the page rewrote the nodes around it (ad
//! injection, comment widget re-render, soft navigation back).

pub mod capture;
pub mod keeper;
pub mod restore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use capture::{anchor_element, build_selector, capture};
pub use keeper::AnchorKeeper;
pub use restore::{restore, PositionLengthRanker, RestoreOutcome, SnippetRanker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub href: String,
    pub scroll_y: f64,
    pub viewport_height: f64,
    pub selector: Option<String>,
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
    /// Anchor top relative to the viewport when captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_offset: Option<f64>,
}

impl AnchorRecord {
    /// Same element and a scroll difference below `min_delta`: not worth a write.
    pub fn is_equivalent(&self, other: &AnchorRecord, min_delta: f64) -> bool {
        self.selector == other.selector
            && self.snippet == other.snippet
            && (self.scroll_y - other.scroll_y).abs() < min_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(scroll_y: f64) -> AnchorRecord {
        AnchorRecord {
            href: "https://news.example/story".into(),
            scroll_y,
            viewport_height: 800.0,
            selector: Some("#c12".into()),
            snippet: "primer comentario".into(),
            timestamp: Utc::now(),
            anchor_offset: Some(240.0),
        }
    }

    #[test]
    fn test_one_pixel_jiggle_is_equivalent() {
        assert!(record(500.0).is_equivalent(&record(501.0), 4.0));
        assert!(!record(500.0).is_equivalent(&record(540.0), 4.0));
    }

    #[test]
    fn test_record_without_offset_still_parses() {
        let value = json!({
            "href": "https://news.example/story",
            "scroll_y": 1200.0,
            "viewport_height": 800.0,
            "selector": null,
            "snippet": "texto",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let record: AnchorRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.anchor_offset, None);
        assert_eq!(record.scroll_y, 1200.0);
    }
}
