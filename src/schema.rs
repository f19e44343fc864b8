//! Schema projection: raw source attributes → sink document fields.
//!
//! Each object kind carries a canonical field map (canonical name →
//! source attribute). Configuration may narrow it with an include or an
//! exclude list; the include list wins when both are present. The `id`
//! field is always injected from the kind's id attribute and is not
//! subject to filtering.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::FieldRules;
use crate::models::{AttrMap, ObjectKind};

/// Canonical field map for one object kind.
pub type FieldMap = BTreeMap<&'static str, &'static str>;

/// The full field map shipped with the connector for each kind.
pub fn default_schema(kind: ObjectKind) -> FieldMap {
    let pairs: &[(&str, &str)] = match kind {
        ObjectKind::Sites => &[
            ("title", "Title"),
            ("description", "Description"),
            ("created_at", "Created"),
            ("last_updated", "LastItemModifiedDate"),
            ("relative_url", "ServerRelativeUrl"),
        ],
        ObjectKind::Lists => &[
            ("title", "Title"),
            ("description", "Description"),
            ("created_at", "Created"),
            ("last_updated", "LastItemModifiedDate"),
            ("parent_url", "ParentWebUrl"),
        ],
        ObjectKind::Items => &[
            ("title", "Title"),
            ("created_at", "Created"),
            ("last_updated", "Modified"),
            ("author_id", "AuthorId"),
        ],
    };
    pairs.iter().copied().collect()
}

/// Reduce the default schema with the configured include/exclude lists
/// and inject the id mapping.
///
/// Filtering matches on the *source* attribute names, the same names a
/// user sees in raw responses. When an include list is present the
/// exclude list is ignored (the combination is unsupported).
pub fn projected_schema(kind: ObjectKind, rules: Option<&FieldRules>) -> FieldMap {
    let mut schema = default_schema(kind);
    if let Some(rules) = rules {
        if !rules.include_fields.is_empty() {
            schema.retain(|_, src| rules.include_fields.iter().any(|f| f == src));
        } else if !rules.exclude_fields.is_empty() {
            schema.retain(|_, src| !rules.exclude_fields.iter().any(|f| f == src));
        }
    }
    schema.insert("id", kind.id_attribute());
    schema
}

/// Project one raw attribute map through a field map.
///
/// Missing source attributes project to `null`, matching what the sink
/// accepts for absent values.
pub fn project(schema: &FieldMap, attrs: &AttrMap) -> Map<String, Value> {
    let mut fields = Map::new();
    for (canonical, source) in schema {
        let value = attrs.get(*source).cloned().unwrap_or(Value::Null);
        fields.insert((*canonical).to_string(), value);
    }
    fields
}
