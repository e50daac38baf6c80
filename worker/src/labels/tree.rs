//! Schema-resolved label tree
//!
//! Raw label JSON is resolved once against the schema into an explicit tree.
//! Only nodes whose class resolves become typed; everything else is carried
//! as untouched JSON and written back as received.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::class::LabelClass;
use super::schema::ClassResolver;
use super::types::{Label, LabelError};

/// A resolved field value
#[derive(Debug)]
pub enum LabelNode {
    /// A label processed as a unit
    Leaf {
        class: LabelClass,
        label: Box<Label>,
    },
    /// Ordered elements of a list-valued field
    Collection(Vec<LabelNode>),
    /// Embedded document whose keys resolve independently
    Embedded {
        class: LabelClass,
        fields: LabelTree,
    },
    /// Unresolved, null or unreadable value
    Untouched(Value),
}

/// Mutable view of one leaf label
#[derive(Debug)]
pub struct LeafMut<'a> {
    pub path: &'a str,
    pub class: LabelClass,
    pub label: &'a mut Label,
}

#[derive(Debug)]
pub struct FieldEntry {
    /// Dotted schema path of the field
    pub path: String,
    pub node: LabelNode,
}

/// Field container at one level of the label structure
#[derive(Debug, Default)]
pub struct LabelTree {
    fields: IndexMap<String, FieldEntry>,
}

impl LabelTree {
    /// Resolve every field of `map` against the schema, prefixing field names
    /// with `prefix` to build dotted paths
    pub fn resolve(map: Map<String, Value>, resolver: &dyn ClassResolver, prefix: &str) -> Self {
        let fields = map
            .into_iter()
            .map(|(name, value)| {
                let path = format!("{prefix}{name}");
                let node = match resolver.resolve(&path) {
                    Some(class) => LabelNode::resolve(value, class, &path, resolver),
                    None => LabelNode::Untouched(value),
                };
                (name, FieldEntry { path, node })
            })
            .collect();

        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&LabelNode> {
        self.fields.get(name).map(|entry| &entry.node)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Dense leaves directly at this level, in field order
    pub fn dense_leaves_mut(&mut self) -> Vec<LeafMut<'_>> {
        let mut leaves = self.leaves_mut();
        leaves.retain(|leaf| leaf.class.is_dense());
        leaves
    }

    /// All leaves directly at this level, in field order
    pub fn leaves_mut(&mut self) -> Vec<LeafMut<'_>> {
        let mut leaves = Vec::new();
        for FieldEntry { path, node } in self.fields.values_mut() {
            node.collect_leaves(path, &mut leaves);
        }
        leaves
    }

    /// Embedded documents directly at this level, in field order
    pub fn embedded_mut(&mut self) -> Vec<&mut LabelTree> {
        let mut documents = Vec::new();
        for entry in self.fields.values_mut() {
            entry.node.collect_embedded(&mut documents);
        }
        documents
    }

    pub fn into_value(self) -> Result<Value, LabelError> {
        let mut map = Map::with_capacity(self.fields.len());
        for (name, entry) in self.fields {
            map.insert(name, entry.node.into_value()?);
        }
        Ok(Value::Object(map))
    }
}

impl LabelNode {
    fn resolve(value: Value, class: LabelClass, path: &str, resolver: &dyn ClassResolver) -> Self {
        match value {
            Value::Array(items) => LabelNode::Collection(
                items
                    .into_iter()
                    .map(|item| {
                        let item_class = element_class(class, &item);
                        Self::resolve_item(item, item_class, path, resolver)
                    })
                    .collect(),
            ),
            value => Self::resolve_item(value, class, path, resolver),
        }
    }

    fn resolve_item(
        value: Value,
        class: LabelClass,
        path: &str,
        resolver: &dyn ClassResolver,
    ) -> Self {
        match value {
            Value::Object(map) if class.is_embedded_document() => LabelNode::Embedded {
                class,
                fields: LabelTree::resolve(map, resolver, &format!("{path}.")),
            },
            Value::Object(_) => match Label::deserialize(&value) {
                Ok(label) => LabelNode::Leaf {
                    class,
                    label: Box::new(label),
                },
                Err(e) => {
                    warn!("Leaving unreadable {} label at '{}' untouched: {}", class, path, e);
                    LabelNode::Untouched(value)
                }
            },
            Value::Null => LabelNode::Untouched(value),
            other => {
                debug!("Non-object value for {} field '{}'", class, path);
                LabelNode::Untouched(other)
            }
        }
    }

    fn collect_leaves<'a>(&'a mut self, path: &'a str, out: &mut Vec<LeafMut<'a>>) {
        match self {
            LabelNode::Leaf { class, label } => out.push(LeafMut {
                path,
                class: *class,
                label: label.as_mut(),
            }),
            LabelNode::Collection(items) => {
                for item in items.iter_mut() {
                    item.collect_leaves(path, out);
                }
            }
            LabelNode::Embedded { .. } | LabelNode::Untouched(_) => {}
        }
    }

    fn collect_embedded<'a>(&'a mut self, out: &mut Vec<&'a mut LabelTree>) {
        match self {
            LabelNode::Embedded { fields, .. } => out.push(fields),
            LabelNode::Collection(items) => {
                for item in items.iter_mut() {
                    item.collect_embedded(out);
                }
            }
            LabelNode::Leaf { .. } | LabelNode::Untouched(_) => {}
        }
    }

    pub fn into_value(self) -> Result<Value, LabelError> {
        match self {
            LabelNode::Leaf { label, .. } => Ok(serde_json::to_value(*label)?),
            LabelNode::Collection(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(LabelNode::into_value)
                    .collect::<Result<_, _>>()?,
            )),
            LabelNode::Embedded { fields, .. } => fields.into_value(),
            LabelNode::Untouched(value) => Ok(value),
        }
    }
}

/// Class of one element of a list-valued field.
///
/// A field typed as a collection class may hold its elements directly; an
/// element without the collection's list attribute is one of its children.
fn element_class(class: LabelClass, item: &Value) -> LabelClass {
    match (class.list_attribute(), class.child_class(), item) {
        (Some(attribute), Some(child), Value::Object(map)) if !map.contains_key(attribute) => child,
        _ => class,
    }
}

/// Top-level `labels` payload: one field container or a sequence of them
#[derive(Debug)]
pub enum LabelInput {
    Single(LabelTree),
    Many(Vec<Option<LabelTree>>),
}

impl LabelInput {
    pub fn resolve(
        labels: Value,
        resolver: &dyn ClassResolver,
        prefix: &str,
    ) -> Result<Self, LabelError> {
        match labels {
            Value::Object(map) => Ok(LabelInput::Single(LabelTree::resolve(map, resolver, prefix))),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| match item {
                    Value::Object(map) => Ok(Some(LabelTree::resolve(map, resolver, prefix))),
                    Value::Null => Ok(None),
                    other => Err(LabelError::Malformed(format!(
                        "element {} of labels is {}, expected an object",
                        index,
                        json_kind(&other)
                    ))),
                })
                .collect::<Result<_, _>>()
                .map(LabelInput::Many),
            other => Err(LabelError::Malformed(format!(
                "labels is {}, expected an object or array",
                json_kind(&other)
            ))),
        }
    }

    pub fn trees_mut(&mut self) -> Vec<&mut LabelTree> {
        match self {
            LabelInput::Single(tree) => vec![tree],
            LabelInput::Many(trees) => trees.iter_mut().flatten().collect(),
        }
    }

    pub fn into_value(self) -> Result<Value, LabelError> {
        match self {
            LabelInput::Single(tree) => tree.into_value(),
            LabelInput::Many(trees) => Ok(Value::Array(
                trees
                    .into_iter()
                    .map(|tree| tree.map_or(Ok(Value::Null), LabelTree::into_value))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
