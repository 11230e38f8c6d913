//! Domain DTOs for the cat API.
//!
//! # Design
//! These types mirror the mock-server's schema but are defined independently;
//! integration tests catch drift between the two crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cat as listed by `/api/cats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cat {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Cat {
    /// Tags as shown in the UI.
    pub fn display_tags(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.to_uppercase()).collect()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.to_lowercase() == tag.to_lowercase())
    }
}

/// Cats in `cats` carrying `tag`, compared case-insensitively, in list order.
pub fn filter_by_tag<'a>(cats: &'a [Cat], tag: &str) -> Vec<&'a Cat> {
    cats.iter().filter(|cat| cat.has_tag(tag)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat(id: &str, tags: &[&str]) -> Cat {
        serde_json::from_value(serde_json::json!({
            "_id": id,
            "tags": tags,
            "createdAt": "2024-03-01T10:00:00Z",
            "updatedAt": "2024-03-02T10:00:00.123Z",
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_api_field_names() {
        let cat: Cat = serde_json::from_str(
            r#"{"_id":"595f280c557291a9750ebf80","tags":["cute","orange"],"owner":"Tom",
                "createdAt":"2024-03-01T10:00:00Z","updatedAt":"2024-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(cat.id, "595f280c557291a9750ebf80");
        assert_eq!(cat.tags, vec!["cute", "orange"]);
        assert_eq!(cat.owner.as_deref(), Some("Tom"));
    }

    #[test]
    fn owner_and_tags_are_optional() {
        let cat = cat("a", &[]);
        assert!(cat.owner.is_none());
        assert!(cat.tags.is_empty());
    }

    #[test]
    fn missing_dates_fail_to_decode() {
        let result: Result<Cat, _> = serde_json::from_str(r#"{"_id":"a","tags":[]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn display_tags_are_uppercased() {
        assert_eq!(cat("a", &["cute", "Orange"]).display_tags(), vec!["CUTE", "ORANGE"]);
    }

    #[test]
    fn filter_ignores_case_and_keeps_order() {
        let cats = vec![cat("a", &["cute"]), cat("b", &["sleepy"]), cat("c", &["CUTE", "fat"])];
        let ids: Vec<&str> = filter_by_tag(&cats, "Cute").iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(filter_by_tag(&cats, "grumpy").is_empty());
    }
}
