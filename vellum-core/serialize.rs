//! Portable JSON form of documents and slices.
//!
//! A node serializes to `{type, attrs?, marks?, content? | text?}`, with
//! empty/default fields omitted. Deserialization runs through the schema, so
//! a parsed document is well formed by construction: unknown types, bad
//! attributes, disallowed marks and grammar violations are all reported as
//! errors rather than smuggled into the tree.

use serde_json::{
  Map,
  Value,
};

use crate::{
  node::{
    Fragment,
    Mark,
    MarkSet,
    Node,
  },
  schema::{
    Attrs,
    Schema,
    SchemaError,
  },
  slice::Slice,
};

pub type Result<T> = std::result::Result<T, SerializeError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SerializeError {
  #[error("malformed document JSON: {reason}")]
  Malformed { reason: String },

  #[error(transparent)]
  Schema(#[from] SchemaError),
}

fn malformed(reason: impl Into<String>) -> SerializeError {
  SerializeError::Malformed {
    reason: reason.into(),
  }
}

impl Node {
  /// This node's portable form.
  pub fn to_json(&self) -> Value {
    node_to_value(self)
  }

  /// Parse a node from its portable form, validating against `schema`.
  pub fn from_json(schema: &Schema, value: &Value) -> Result<Node> {
    node_from_value(schema, value)
  }
}

/// Serialize a node (and its subtree) to its portable form.
pub fn node_to_value(node: &Node) -> Value {
  let mut map = Map::new();
  map.insert("type".to_owned(), Value::String(node.type_name().to_owned()));
  if !node.attrs().is_empty() {
    map.insert("attrs".to_owned(), attrs_to_value(node.attrs()));
  }
  if !node.marks().is_empty() {
    map.insert(
      "marks".to_owned(),
      Value::Array(node.marks().iter().map(mark_to_value).collect()),
    );
  }
  if let Some(text) = node.text() {
    map.insert("text".to_owned(), Value::String(text.to_owned()));
  } else if node.child_count() > 0 {
    map.insert(
      "content".to_owned(),
      Value::Array(node.content().iter().map(node_to_value).collect()),
    );
  }
  Value::Object(map)
}

fn mark_to_value(mark: &Mark) -> Value {
  let mut map = Map::new();
  map.insert("type".to_owned(), Value::String(mark.type_name().to_owned()));
  if !mark.attrs().is_empty() {
    map.insert("attrs".to_owned(), attrs_to_value(mark.attrs()));
  }
  Value::Object(map)
}

fn attrs_to_value(attrs: &Attrs) -> Value {
  Value::Object(
    attrs
      .iter()
      .map(|(key, value)| (key.clone(), value.clone()))
      .collect(),
  )
}

/// Parse a node from its portable form, validating against `schema`.
pub fn node_from_value(schema: &Schema, value: &Value) -> Result<Node> {
  let obj = value
    .as_object()
    .ok_or_else(|| malformed("node must be an object"))?;
  let type_name = obj
    .get("type")
    .and_then(Value::as_str)
    .ok_or_else(|| malformed("node is missing its \"type\""))?;
  let attrs = parse_attrs(obj.get("attrs"))?;
  let marks = parse_marks(schema, obj.get("marks"))?;

  let node_type = schema.node_type(type_name)?;
  if node_type.is_text() {
    let text = obj
      .get("text")
      .and_then(Value::as_str)
      .ok_or_else(|| malformed("text node is missing its \"text\""))?;
    if obj.contains_key("content") {
      return Err(malformed("text node cannot have content"));
    }
    return Ok(schema.text_with_marks(text, marks));
  }

  let mut children = Vec::new();
  if let Some(content) = obj.get("content") {
    let items = content
      .as_array()
      .ok_or_else(|| malformed("\"content\" must be an array"))?;
    for item in items {
      children.push(node_from_value(schema, item)?);
    }
  }
  let node = schema.node(type_name, attrs.as_ref(), Fragment::from_nodes(children))?;
  Ok(if marks.is_empty() {
    node
  } else {
    node.with_marks(marks)
  })
}

fn parse_attrs(value: Option<&Value>) -> Result<Option<Attrs>> {
  match value {
    None | Some(Value::Null) => Ok(None),
    Some(Value::Object(map)) => Ok(Some(
      map
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect(),
    )),
    Some(_) => Err(malformed("\"attrs\" must be an object")),
  }
}

fn parse_marks(schema: &Schema, value: Option<&Value>) -> Result<MarkSet> {
  let items = match value {
    None | Some(Value::Null) => return Ok(MarkSet::empty()),
    Some(Value::Array(items)) => items,
    Some(_) => return Err(malformed("\"marks\" must be an array")),
  };
  let mut marks = MarkSet::empty();
  for item in items {
    let obj = item
      .as_object()
      .ok_or_else(|| malformed("mark must be an object"))?;
    let type_name = obj
      .get("type")
      .and_then(Value::as_str)
      .ok_or_else(|| malformed("mark is missing its \"type\""))?;
    let attrs = parse_attrs(obj.get("attrs"))?;
    marks = marks.add(&schema.mark(type_name, attrs.as_ref())?);
  }
  Ok(marks)
}

/// Serialize a slice: its content plus the two open depths.
pub fn slice_to_value(slice: &Slice) -> Value {
  let mut map = Map::new();
  if !slice.content().is_empty() {
    map.insert(
      "content".to_owned(),
      Value::Array(slice.content().iter().map(node_to_value).collect()),
    );
  }
  if slice.open_start() > 0 {
    map.insert("openStart".to_owned(), slice.open_start().into());
  }
  if slice.open_end() > 0 {
    map.insert("openEnd".to_owned(), slice.open_end().into());
  }
  Value::Object(map)
}

pub fn slice_from_value(schema: &Schema, value: &Value) -> Result<Slice> {
  let obj = value
    .as_object()
    .ok_or_else(|| malformed("slice must be an object"))?;
  let mut nodes = Vec::new();
  if let Some(content) = obj.get("content") {
    let items = content
      .as_array()
      .ok_or_else(|| malformed("\"content\" must be an array"))?;
    for item in items {
      nodes.push(node_from_value(schema, item)?);
    }
  }
  let open = |key: &str| -> Result<usize> {
    match obj.get(key) {
      None => Ok(0),
      Some(value) => value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| malformed(format!("\"{key}\" must be a non-negative integer"))),
    }
  };
  let content = Fragment::from_nodes(nodes);
  let open_start = open("openStart")?;
  let open_end = open("openEnd")?;
  if open_start > open_limit(&content, true) {
    return Err(malformed("\"openStart\" exceeds the content's depth"));
  }
  if open_end > open_limit(&content, false) {
    return Err(malformed("\"openEnd\" exceeds the content's depth"));
  }
  Ok(Slice::new(content, open_start, open_end))
}

/// How deep a slice may be open on one side: one level per non-leaf node
/// along the first (or last) child chain.
fn open_limit(content: &Fragment, from_start: bool) -> usize {
  let mut depth = 0;
  let mut at = edge_child(content, from_start);
  while let Some(node) = at {
    if node.is_leaf() {
      break;
    }
    depth += 1;
    at = edge_child(node.content(), from_start);
  }
  depth
}

fn edge_child(fragment: &Fragment, from_start: bool) -> Option<&Node> {
  if from_start {
    fragment.child(0)
  } else {
    fragment.child(fragment.count().checked_sub(1)?)
  }
}
