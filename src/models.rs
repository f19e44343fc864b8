//! Core data types that flow through the crawl pipeline.

use serde_json::{Map, Value};

/// Timestamp format used in source queries and checkpoint logs.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One level of the source hierarchy that produces indexable documents.
///
/// Attachments are not a kind of their own: they are folded into their
/// item's body during the item stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Sites,
    Lists,
    Items,
}

impl ObjectKind {
    /// All kinds in traversal order (top-down).
    pub const ALL: [ObjectKind; 3] = [ObjectKind::Sites, ObjectKind::Lists, ObjectKind::Items];

    /// Plural key used in configuration and the identity registry.
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Sites => "sites",
            ObjectKind::Lists => "lists",
            ObjectKind::Items => "items",
        }
    }

    /// The `type` tag stamped on sink documents.
    pub fn type_tag(self) -> &'static str {
        match self {
            ObjectKind::Sites => "site",
            ObjectKind::Lists => "list",
            ObjectKind::Items => "item",
        }
    }

    /// Source attribute injected as the document `id`.
    ///
    /// Items carry a stable GUID; sites and lists expose an opaque `Id`.
    pub fn id_attribute(self) -> &'static str {
        match self {
            ObjectKind::Items => "GUID",
            _ => "Id",
        }
    }
}

/// Raw attribute map returned by the source for one object.
pub type AttrMap = Map<String, Value>;

/// Sink-bound normalized record produced by the schema projector and the
/// permission resolver. Handed to the sink in batches, never retained.
#[derive(Debug, Clone)]
pub struct Document {
    pub kind: ObjectKind,
    /// Projected canonical fields, including the injected `id`.
    pub fields: Map<String, Value>,
    pub url: Option<String>,
    /// Titles of the principals allowed to see this document.
    pub allow_permissions: Vec<String>,
}

impl Document {
    /// The injected id as a string, regardless of the source's JSON type.
    pub fn id(&self) -> Option<String> {
        match self.fields.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        }
    }

    /// Flatten the document into the JSON object the sink expects.
    pub fn to_payload(&self) -> Value {
        let mut payload = self.fields.clone();
        payload.insert("type".into(), Value::String(self.kind.type_tag().into()));
        if let Some(ref url) = self.url {
            payload.insert("url".into(), Value::String(url.clone()));
        }
        if !self.allow_permissions.is_empty() {
            payload.insert(
                "_allow_permissions".into(),
                Value::Array(
                    self.allow_permissions
                        .iter()
                        .map(|p| Value::String(p.clone()))
                        .collect(),
                ),
            );
        }
        Value::Object(payload)
    }
}
