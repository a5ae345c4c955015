use crate::core::models::item::ItemRecord;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::LazyLock;

pub const PLACEHOLDER_COVER: &str = "https://via.placeholder.com/128x190.png?text=No+Cover";
pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_AUTHOR: &str = "Unknown Author";
pub const DEFAULT_CATEGORY: &str = "Fiction";
pub const DEFAULT_RATING: &str = "N/A";
pub const DEFAULT_DESCRIPTION: &str = "No description available.";

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("html tag pattern is valid"));

/// Display ready view of a google books volume payload.
/// Every missing field is substituted with a default so
/// screens never have to deal with partial records.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VolumeSummary {
    pub id: String,
    pub title: String,
    pub author: String,
    pub category: String,
    pub rating: String,
    pub cover_url: String,
    pub description: String,
    pub preview_link: Option<String>,
}

fn first_str(info: Option<&Value>, key: &str) -> Option<String> {
    info?
        .get(key)?
        .as_array()?
        .first()?
        .as_str()
        .map(str::to_string)
}

fn str_field(info: Option<&Value>, key: &str) -> Option<String> {
    info?
        .get(key)?
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

fn rating(info: Option<&Value>) -> String {
    match info.and_then(|i| i.get("averageRating")) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        _ => DEFAULT_RATING.to_string(),
    }
}

fn cover(info: Option<&Value>) -> String {
    info.and_then(|i| i.get("imageLinks"))
        .and_then(|links| links.get("thumbnail"))
        .and_then(Value::as_str)
        .map(|thumb| thumb.replacen("http:", "https:", 1))
        .unwrap_or_else(|| PLACEHOLDER_COVER.to_string())
}

fn strip_html(raw: &str) -> String {
    HTML_TAG.replace_all(raw, "").trim().to_string()
}

impl VolumeSummary {
    pub fn from_record(item: &ItemRecord) -> Self {
        let info = item.field("volumeInfo");

        let description = str_field(info, "description")
            .map(|d| strip_html(&d))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string());

        Self {
            id: item.id.clone(),
            title: str_field(info, "title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            author: first_str(info, "authors").unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            category: first_str(info, "categories")
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            rating: rating(info),
            cover_url: cover(info),
            description,
            preview_link: str_field(info, "previewLink"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_record_gets_all_defaults() {
        let item = ItemRecord::from_value(json!({ "id": "bare" })).unwrap();
        let summary = VolumeSummary::from_record(&item);

        assert_eq!(summary.id, "bare");
        assert_eq!(summary.title, DEFAULT_TITLE);
        assert_eq!(summary.author, DEFAULT_AUTHOR);
        assert_eq!(summary.category, DEFAULT_CATEGORY);
        assert_eq!(summary.rating, DEFAULT_RATING);
        assert_eq!(summary.cover_url, PLACEHOLDER_COVER);
        assert_eq!(summary.description, DEFAULT_DESCRIPTION);
        assert!(summary.preview_link.is_none());
    }

    #[test]
    fn test_full_volume() {
        let item = ItemRecord::from_value(json!({
            "id": "zyTCAlFPjgYC",
            "volumeInfo": {
                "title": "The Google Story",
                "authors": ["David A. Vise", "Mark Malseed"],
                "categories": ["Business"],
                "averageRating": 3.5,
                "description": "<p>Here is the <b>story</b></p>",
                "imageLinks": { "thumbnail": "http://books.google.com/cover.jpg" },
                "previewLink": "http://books.google.com/preview"
            }
        }))
        .unwrap();

        let summary = VolumeSummary::from_record(&item);

        assert_eq!(summary.title, "The Google Story");
        assert_eq!(summary.author, "David A. Vise");
        assert_eq!(summary.category, "Business");
        assert_eq!(summary.rating, "3.5");
        assert_eq!(summary.cover_url, "https://books.google.com/cover.jpg");
        assert_eq!(summary.description, "Here is the story");
        assert_eq!(
            summary.preview_link.as_deref(),
            Some("http://books.google.com/preview")
        );
    }

    #[test]
    fn test_tag_only_description_falls_back() {
        let item = ItemRecord::from_value(json!({
            "id": "t",
            "volumeInfo": { "description": "<br/>" }
        }))
        .unwrap();

        assert_eq!(
            VolumeSummary::from_record(&item).description,
            DEFAULT_DESCRIPTION
        );
    }
}
