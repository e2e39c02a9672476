//! Sample command documents.
//!
//! Documents are arbitrary JSON objects. Mutation code matches on
//! [`serde_json::Value`] variants rather than inspecting types at runtime.

use serde_json::{Map, Value};

/// A command body: one top-level JSON object.
pub type Document = Map<String, Value>;

/// Key holding a document's certname.
pub const CERTNAME_KEY: &str = "certname";

/// Key holding the fact map in a facts document.
pub const VALUES_KEY: &str = "values";

/// Key the client stamps with the submission time.
pub const PRODUCER_TIMESTAMP_KEY: &str = "producer_timestamp";

/// The document's certname, if it has a string one.
pub fn certname(doc: &Document) -> Option<&str> {
    doc.get(CERTNAME_KEY).and_then(Value::as_str)
}

/// Overwrite the document's certname.
pub fn set_certname(doc: &mut Document, certname: &str) {
    doc.insert(CERTNAME_KEY.to_string(), Value::String(certname.to_string()));
}

/// The fact map of a facts-shaped document.
pub fn values(doc: &Document) -> Option<&Map<String, Value>> {
    doc.get(VALUES_KEY).and_then(Value::as_object)
}

/// Mutable access to the fact map of a facts-shaped document.
pub fn values_mut(doc: &mut Document) -> Option<&mut Map<String, Value>> {
    doc.get_mut(VALUES_KEY).and_then(Value::as_object_mut)
}
