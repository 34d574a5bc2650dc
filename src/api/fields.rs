//! Human readable aliases for custom fields.
//!
//! Custom fields arrive under opaque ids such as `customfield_10001`. When
//! aliasing is enabled, each one is also reachable under a name derived from
//! its display name (`Story Points` becomes `story_points`). Aliases are
//! strictly additive: the opaque id always stays reachable, and an alias that
//! collides with an existing attribute is dropped.

use std::collections::BTreeMap;

use super::resource::PropertyHolder;

/// Convert a field display name into an attribute name.
///
/// The name is lower-cased, every run of characters other than ASCII letters
/// and digits becomes a single `_`, and leading or trailing underscores are
/// trimmed. Names that would start with a digit get a `field_` prefix.
/// Returns `None` when nothing usable is left.
pub fn display_name_to_attribute(display_name: &str) -> Option<String> {
    let mut name = String::with_capacity(display_name.len());
    let mut pending_separator = false;

    for ch in display_name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !name.is_empty() {
                name.push('_');
            }
            pending_separator = false;
            name.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    if name.is_empty() {
        return None;
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "field_");
    }
    Some(name)
}

/// Alias table: attribute name to field id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldAliases {
    by_alias: BTreeMap<String, String>,
}

impl FieldAliases {
    /// Build the table from a `GET field` response. Only custom fields get
    /// aliases; the first field claiming an alias keeps it.
    pub fn from_fields(fields: &[serde_json::Value]) -> Self {
        let pairs = fields.iter().filter_map(|field| {
            let id = field.get("id")?.as_str()?;
            let custom = field
                .get("custom")
                .and_then(|c| c.as_bool())
                .unwrap_or_else(|| id.starts_with("customfield_"));
            if !custom {
                return None;
            }
            Some((field.get("name")?.as_str()?, id))
        });
        Self::from_pairs(pairs)
    }

    /// Build the table from `(display name, field id)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut by_alias = BTreeMap::new();
        for (display_name, id) in pairs {
            if let Some(alias) = display_name_to_attribute(display_name) {
                if alias != id {
                    by_alias.entry(alias).or_insert_with(|| id.to_string());
                }
            }
        }
        Self { by_alias }
    }

    /// The field id an alias points at.
    pub fn field_id(&self, alias: &str) -> Option<&str> {
        self.by_alias.get(alias).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }

    /// Add aliases to `holder` for every field it carries.
    ///
    /// Returns the number of aliases added.
    pub fn apply(&self, holder: &mut PropertyHolder) -> usize {
        let mut added = 0;
        for (alias, id) in &self.by_alias {
            if holder.contains(id) && !holder.contains(alias) && holder.add_alias(alias, id) {
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::resource::{Attribute, Attributes};
    use serde_json::json;

    fn convert(name: &str) -> String {
        display_name_to_attribute(name).unwrap_or_default()
    }

    #[test]
    fn test_basic_conversion() {
        assert_eq!(convert("Story Points"), "story_points");
        assert_eq!(convert("Internal Target Milestone"), "internal_target_milestone");
        assert_eq!(convert("Epic Link"), "epic_link");
    }

    #[test]
    fn test_special_characters_collapse() {
        assert_eq!(convert("Story-Points"), "story_points");
        assert_eq!(convert("Business   Value---Score"), "business_value_score");
        assert_eq!(convert("Field!!Name@@Here"), "field_name_here");
        assert_eq!(convert("-Story Points-"), "story_points");
        assert_eq!(convert("__Field Name__"), "field_name");
    }

    #[test]
    fn test_leading_digits_are_prefixed() {
        assert_eq!(convert("10 Point Scale"), "field_10_point_scale");
        assert_eq!(convert("3rd Party Integration"), "field_3rd_party_integration");
        assert_eq!(convert("1"), "field_1");
    }

    #[test]
    fn test_edge_cases() {
        assert_eq!(convert("A"), "a");
        assert_eq!(convert("story_points"), "story_points");
        assert_eq!(convert("STORY_POINTS"), "story_points");
        assert_eq!(convert("CamelCaseField"), "camelcasefield");
        assert_eq!(display_name_to_attribute("!!!"), None);
        assert_eq!(display_name_to_attribute(""), None);
    }

    fn holder(raw: serde_json::Value) -> PropertyHolder {
        match Attribute::from_json(raw) {
            Attribute::Holder(holder) => holder,
            other => panic!("Expected holder, got {:?}", other),
        }
    }

    #[test]
    fn test_from_fields_only_aliases_custom_fields() {
        let aliases = FieldAliases::from_fields(&[
            json!({"id": "summary", "name": "Summary", "custom": false}),
            json!({"id": "customfield_10001", "name": "Story Points", "custom": true}),
            json!({"id": "customfield_10002", "name": "Sprint"}),
            json!({"id": "customfield_10003", "name": "Story Points", "custom": true}),
        ]);
        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases.field_id("story_points"), Some("customfield_10001"));
        assert_eq!(aliases.field_id("sprint"), Some("customfield_10002"));
        assert_eq!(aliases.field_id("summary"), None);
    }

    #[test]
    fn test_apply_adds_aliases_and_keeps_ids() {
        let mut fields = holder(json!({
            "customfield_10001": 5,
            "customfield_10002": 42,
            "customfield_10003": ["label1", "label2"],
            "summary": "Test Issue"
        }));
        let aliases = FieldAliases::from_pairs([
            ("Story Points", "customfield_10001"),
            ("Sprint", "customfield_10002"),
            ("Labels", "customfield_10003"),
        ]);

        assert_eq!(aliases.apply(&mut fields), 3);

        assert_eq!(fields.get("story_points").and_then(Attribute::as_i64), Some(5));
        assert_eq!(fields.get("sprint").and_then(Attribute::as_i64), Some(42));
        assert_eq!(fields.get("labels").map(Attribute::to_raw), Some(json!(["label1", "label2"])));
        assert_eq!(fields.get("customfield_10001").and_then(Attribute::as_i64), Some(5));
        // Aliases never leak into the raw form.
        assert!(fields.to_raw().get("story_points").is_none());
    }

    #[test]
    fn test_apply_without_custom_fields_is_a_no_op() {
        let mut fields = holder(json!({"summary": "Test Issue", "status": "Open"}));
        let before = fields.attribute_names();
        let aliases = FieldAliases::from_pairs([("Story Points", "customfield_10001")]);

        assert_eq!(aliases.apply(&mut fields), 0);
        assert_eq!(fields.attribute_names(), before);
    }

    #[test]
    fn test_collision_keeps_standard_field() {
        let mut fields = holder(json!({
            "customfield_10001": "epic-value",
            "summary": "Original Summary"
        }));
        let aliases = FieldAliases::from_pairs([("Summary", "customfield_10001")]);

        assert_eq!(aliases.apply(&mut fields), 0);
        assert_eq!(fields.get("summary").and_then(Attribute::as_str), Some("Original Summary"));
    }

    #[test]
    fn test_null_and_empty_values_are_aliased() {
        let mut fields = holder(json!({
            "customfield_10001": null,
            "customfield_10002": "",
            "customfield_10003": []
        }));
        let aliases = FieldAliases::from_pairs([
            ("Story Points", "customfield_10001"),
            ("Summary", "customfield_10002"),
            ("Labels", "customfield_10003"),
        ]);

        aliases.apply(&mut fields);

        assert!(fields.get("story_points").map(Attribute::is_null).unwrap_or(false));
        assert_eq!(fields.get("summary").and_then(Attribute::as_str), Some(""));
        assert_eq!(fields.get("labels").map(Attribute::to_raw), Some(json!([])));
    }
}
