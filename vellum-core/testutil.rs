//! Shared fixtures for the crate's tests.

use once_cell::sync::Lazy;

use crate::{
  node::{
    Fragment,
    Node,
  },
  schema::{
    Schema,
    SchemaSpec,
  },
};

/// A small rich-text schema used throughout the tests: paragraphs, headings
/// with a level, blockquotes, inline images, and bold/italic/code/link marks
/// (code excluding the styling marks).
static SCHEMA: Lazy<Schema> = Lazy::new(|| {
  let spec: SchemaSpec = serde_json::from_value(serde_json::json!({
    "nodes": {
      "doc":        { "content": "block+" },
      "paragraph":  { "content": "inline*", "group": "block", "tag": "p" },
      "heading":    { "content": "inline*", "group": "block", "tag": "h",
                      "attrs": { "level": { "default": 1 } } },
      "blockquote": { "content": "block+", "group": "block", "tag": "bq" },
      "text":       { "text": true, "group": "inline" },
      "image":      { "inline": true, "group": "inline", "tag": "img",
                      "attrs": { "src": { "default": "" } } }
    },
    "marks": {
      "bold":   { "tag": "b" },
      "italic": { "tag": "i" },
      "code":   { "tag": "c", "excludes": ["bold", "italic"] },
      "link":   { "tag": "a", "attrs": { "href": {} } }
    }
  }))
  .unwrap();
  Schema::new(spec).unwrap()
});

pub(crate) fn schema() -> Schema {
  SCHEMA.clone()
}

pub(crate) fn doc(schema: &Schema, children: Vec<Node>) -> Node {
  schema.node("doc", None, children).unwrap()
}

/// A paragraph holding a single plain text run (or nothing, for "").
pub(crate) fn p(schema: &Schema, text: &str) -> Node {
  let content = if text.is_empty() {
    Fragment::empty()
  } else {
    Fragment::from(schema.text(text))
  };
  schema.node("paragraph", None, content).unwrap()
}
