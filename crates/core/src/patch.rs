//! Partial-update payload.

use serde::{Deserialize, Serialize};

/// Patch for an [`Entity`](crate::Entity).
///
/// Each field is optional and its *absence* means "leave unchanged". A field
/// that is present but empty is not the same thing: it is validated like any
/// other value and rejected. JSON `null` decodes as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl EntityUpdate {
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
        }
    }

    /// True when the patch carries no fields at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_decodes_as_absent() {
        let patch: EntityUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(patch.title, None);
        assert!(patch.is_empty());
    }

    #[test]
    fn empty_string_decodes_as_present() {
        let patch: EntityUpdate = serde_json::from_str(r#"{"title":""}"#).unwrap();
        assert_eq!(patch.title.as_deref(), Some(""));
        assert!(!patch.is_empty());
    }

    #[test]
    fn null_decodes_as_absent() {
        let patch: EntityUpdate = serde_json::from_str(r#"{"title":null}"#).unwrap();
        assert_eq!(patch.title, None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let patch: EntityUpdate =
            serde_json::from_str(r#"{"title":"Final","id":"ignored"}"#).unwrap();
        assert_eq!(patch, EntityUpdate::with_title("Final"));
    }
}
