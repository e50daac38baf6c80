//! Identifier remapping from stored `_id` values to client-facing `id` strings

use serde_json::{Map, Value};

use super::class::LabelClass;
use super::types::Label;

/// Remap identifiers of a recognized label.
///
/// Collection classes remap each element of their list attribute; every other
/// class remaps the label's own identifier.
pub fn remap_ids(label: &mut Label, class: LabelClass) {
    match class.list_attribute() {
        Some("detections") => {
            if let Some(children) = label.detections.as_mut() {
                children.iter_mut().for_each(remap_label_id);
            }
        }
        Some(attribute) => {
            if let Some(Value::Array(items)) = label.attributes.get_mut(attribute) {
                for item in items.iter_mut() {
                    if let Value::Object(object) = item {
                        remap_object_id(object);
                    }
                }
            }
        }
        None => remap_label_id(label),
    }
}

fn remap_label_id(label: &mut Label) {
    if let Some(raw) = label.raw_id.take() {
        match id_string(&raw) {
            Some(id) => label.id = Some(id),
            None => label.raw_id = Some(raw),
        }
    }
}

fn remap_object_id(object: &mut Map<String, Value>) {
    if let Some(raw) = object.remove("_id") {
        match id_string(&raw) {
            Some(id) => {
                object.insert("id".to_string(), Value::String(id));
            }
            None => {
                object.insert("_id".to_string(), raw);
            }
        }
    }
}

/// `"abc"` and `{"$oid": "abc"}` both yield `abc`
pub(crate) fn id_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Object(object) => object.get("$oid").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}
