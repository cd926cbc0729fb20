//! Schema registry: node and mark types, attribute specs and content
//! grammars.
//!
//! A [`Schema`] is built once from a [`SchemaSpec`] and validated eagerly:
//! every name a content expression mentions must be a declared type or group,
//! text types may not carry content or attributes, and mark exclusivity rules
//! may not form cycles. All of these are developer errors, so they fail
//! construction with a [`SchemaError`] instead of surfacing later during
//! editing.
//!
//! # Content grammars
//!
//! A content expression is a sequence of terms, each a type name, a group
//! name or a `(a | b)` choice, optionally followed by `?`, `*` or `+`:
//!
//! ```text
//! doc:        "block+"
//! paragraph:  "text*"
//! figure:     "image caption?"
//! ```
//!
//! Expressions are compiled at schema build time into a small automaton that
//! is simulated as a state set, so validating a fragment is O(children).

use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::debug;

use crate::{
  Text,
  node::{
    Fragment,
    Mark,
    MarkSet,
    Node,
  },
};

pub type Result<T> = std::result::Result<T, SchemaError>;

/// Attribute values attached to a node or mark, in declaration order.
pub type Attrs = IndexMap<String, Value>;

#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum SchemaError {
  #[error("schema is missing the required {0:?} node type")]
  MissingNodeType(String),
  #[error("node type {0:?} is not defined")]
  UnknownNodeType(String),
  #[error("mark type {0:?} is not defined")]
  UnknownMarkType(String),
  #[error("content expression of {node:?}: unknown type or group {name:?}")]
  UnknownContentRef { node: String, name: String },
  #[error("content expression of {node:?}: {message} at offset {offset}")]
  InvalidExpr {
    node:    String,
    offset:  usize,
    message: String,
  },
  #[error("text type {name:?} may not declare a content expression")]
  TextWithContent { name: String },
  #[error("text type {name:?} may not declare attributes")]
  TextWithAttrs { name: String },
  #[error("content expression of {node:?} mixes inline and block types")]
  MixedContent { node: String },
  #[error("mark exclusivity rules form a cycle involving {mark:?}")]
  ExclusivityCycle { mark: String },
  #[error("missing required attribute {attr:?} on {name:?}")]
  MissingAttr { name: String, attr: String },
  #[error("unknown attribute {attr:?} on {name:?}")]
  UnknownAttr { name: String, attr: String },
  #[error("cannot build a default document: {node:?} has no fillable content")]
  NoDefaultContent { node: String },
  #[error("mark {mark:?} is not allowed inside {node:?}")]
  MarkNotAllowed { node: String, mark: String },
  #[error(transparent)]
  Content(#[from] InvalidContent),
}

/// A fragment does not satisfy the content grammar of its parent type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid content for node {parent:?}")]
pub struct InvalidContent {
  pub parent: String,
}

/// Declaration of a single attribute. An attribute without a default is
/// required.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttrSpec {
  #[serde(default)]
  pub default: Option<Value>,
}

/// Declaration of a node type, before compilation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeSpec {
  /// Content grammar expression. `None` declares a leaf.
  #[serde(default)]
  pub content: Option<String>,
  /// Space-separated group names this type belongs to.
  #[serde(default)]
  pub group:   Option<String>,
  /// Inline nodes live in text-bearing content; block nodes do not.
  #[serde(default)]
  pub inline:  bool,
  /// Marks the single text type of a schema.
  #[serde(default)]
  pub text:    bool,
  /// Marks allowed on this node's children: `None` means all for inline and
  /// text-bearing types and none otherwise, `""` none, `"_"` all, otherwise
  /// space-separated names.
  #[serde(default)]
  pub marks:   Option<String>,
  #[serde(default)]
  pub attrs:   IndexMap<String, AttrSpec>,
  /// Tag used by the markup form. Types without a tag render transparently.
  #[serde(default)]
  pub tag:     Option<String>,
}

/// Declaration of a mark type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MarkSpec {
  #[serde(default)]
  pub attrs:    IndexMap<String, AttrSpec>,
  /// Mark types removed when this mark is added to a set. A mark may exclude
  /// itself (replacing an older instance), but cycles among distinct marks
  /// are rejected.
  #[serde(default)]
  pub excludes: Vec<String>,
  #[serde(default)]
  pub tag:      Option<String>,
}

/// Complete schema declaration. Declaration order is significant: it decides
/// group iteration order and the order serialization emits types in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaSpec {
  #[serde(default)]
  pub nodes: IndexMap<String, NodeSpec>,
  #[serde(default)]
  pub marks: IndexMap<String, MarkSpec>,
}

/// One term of a compiled content expression.
#[derive(Debug, Clone, PartialEq)]
struct Unit {
  /// Resolved type names this term accepts.
  names:   Vec<String>,
  /// Must match at least once.
  min_one: bool,
  /// May match more than once.
  many:    bool,
}

impl Unit {
  fn accepts(&self, name: &str) -> bool {
    self.names.iter().any(|n| n == name)
  }
}

/// Compiled content grammar. Matching simulates the automaton with a set of
/// positions, one integer per "terms fully consumed so far" state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentExpr {
  units: Vec<Unit>,
}

impl ContentExpr {
  /// Whether a sequence of child type names satisfies the grammar.
  pub fn matches<'a>(&self, children: impl Iterator<Item = &'a str>) -> bool {
    let mut states: SmallVec<[usize; 4]> = SmallVec::new();
    states.push(0);

    for child in children {
      let mut next: SmallVec<[usize; 4]> = SmallVec::new();
      for &state in &states {
        // Loop back into the previous term when it is repeatable.
        if state > 0 {
          let unit = &self.units[state - 1];
          if unit.many && unit.accepts(child) && !next.contains(&state) {
            next.push(state);
          }
        }
        // Advance, skipping over optional terms.
        let mut i = state;
        while i < self.units.len() {
          let unit = &self.units[i];
          if unit.accepts(child) && !next.contains(&(i + 1)) {
            next.push(i + 1);
          }
          if unit.min_one {
            break;
          }
          i += 1;
        }
      }
      if next.is_empty() {
        return false;
      }
      states = next;
    }

    states
      .iter()
      .any(|&state| self.units[state..].iter().all(|unit| !unit.min_one))
  }

  /// Whether the empty sequence satisfies the grammar.
  pub fn matches_empty(&self) -> bool {
    self.units.iter().all(|unit| !unit.min_one)
  }
}

/// How marks are allowed on a node type.
#[derive(Debug, Clone, PartialEq)]
enum MarkAllowance {
  All,
  None,
  Only(Vec<String>),
}

/// Compiled node type. Obtained from a [`Schema`], never built directly.
#[derive(Debug, PartialEq)]
pub struct NodeType {
  name:           String,
  spec:           NodeSpec,
  content:        Option<ContentExpr>,
  marks:          MarkAllowance,
  /// Whether the content expression references only inline types.
  inline_content: bool,
}

impl NodeType {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn spec(&self) -> &NodeSpec {
    &self.spec
  }

  pub fn is_text(&self) -> bool {
    self.spec.text
  }

  /// Leaf types have no content expression and may not have children.
  pub fn is_leaf(&self) -> bool {
    self.content.is_none()
  }

  pub fn is_inline(&self) -> bool {
    self.spec.inline || self.spec.text
  }

  pub fn is_block(&self) -> bool {
    !self.is_inline()
  }

  /// Whether children of this type are inline (i.e. this is a textblock).
  pub fn inline_content(&self) -> bool {
    self.inline_content
  }

  pub fn allows_mark(&self, mark: &str) -> bool {
    match &self.marks {
      MarkAllowance::All => true,
      MarkAllowance::None => false,
      MarkAllowance::Only(names) => names.iter().any(|n| n == mark),
    }
  }

  /// Whether a child sequence satisfies this type's content grammar.
  pub fn valid_content(&self, content: &Fragment) -> bool {
    match &self.content {
      None => content.count() == 0,
      Some(expr) => expr.matches(content.iter().map(|child| child.type_name())),
    }
  }

  /// Fill in attribute defaults, rejecting unknown and missing attributes.
  pub fn compute_attrs(&self, given: Option<&Attrs>) -> Result<Attrs> {
    compute_attrs(&self.name, &self.spec.attrs, given)
  }
}

/// Compiled mark type.
#[derive(Debug, PartialEq)]
pub struct MarkType {
  name:     String,
  spec:     MarkSpec,
  excluded: Vec<String>,
}

impl MarkType {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn spec(&self) -> &MarkSpec {
    &self.spec
  }

  /// Whether adding this mark removes an existing mark of type `other`.
  /// Marks of the same type always replace each other.
  pub fn excludes(&self, other: &str) -> bool {
    self.name == other || self.excluded.iter().any(|n| n == other)
  }

  pub fn compute_attrs(&self, given: Option<&Attrs>) -> Result<Attrs> {
    compute_attrs(&self.name, &self.spec.attrs, given)
  }
}

fn compute_attrs(
  owner: &str,
  specs: &IndexMap<String, AttrSpec>,
  given: Option<&Attrs>,
) -> Result<Attrs> {
  if let Some(given) = given {
    for key in given.keys() {
      if !specs.contains_key(key) {
        return Err(SchemaError::UnknownAttr {
          name: owner.to_owned(),
          attr: key.clone(),
        });
      }
    }
  }

  let mut attrs = Attrs::with_capacity(specs.len());
  for (key, spec) in specs {
    let value = given
      .and_then(|given| given.get(key).cloned())
      .or_else(|| spec.default.clone());
    match value {
      Some(value) => {
        attrs.insert(key.clone(), value);
      },
      None => {
        return Err(SchemaError::MissingAttr {
          name: owner.to_owned(),
          attr: key.clone(),
        });
      },
    }
  }
  Ok(attrs)
}

struct SchemaInner {
  nodes:     IndexMap<String, Arc<NodeType>>,
  marks:     IndexMap<String, Arc<MarkType>>,
  doc_type:  Arc<NodeType>,
  text_type: Arc<NodeType>,
}

/// A validated, compiled schema. Cheap to clone and share.
#[derive(Clone)]
pub struct Schema {
  inner: Arc<SchemaInner>,
}

impl std::fmt::Debug for Schema {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Schema")
      .field("nodes", &self.inner.nodes.keys().collect::<Vec<_>>())
      .field("marks", &self.inner.marks.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl Schema {
  /// Compile a schema declaration. Every structural rule is checked here;
  /// a schema that constructs successfully never produces grammar surprises
  /// at edit time.
  pub fn new(spec: SchemaSpec) -> Result<Schema> {
    if !spec.nodes.contains_key("doc") {
      return Err(SchemaError::MissingNodeType("doc".into()));
    }
    let has_text = spec.nodes.get("text").is_some_and(|s| s.text);
    if !has_text {
      return Err(SchemaError::MissingNodeType("text".into()));
    }

    for (name, node_spec) in &spec.nodes {
      if node_spec.text {
        if node_spec.content.is_some() {
          return Err(SchemaError::TextWithContent { name: name.clone() });
        }
        if !node_spec.attrs.is_empty() {
          return Err(SchemaError::TextWithAttrs { name: name.clone() });
        }
      }
    }

    let mut nodes = IndexMap::with_capacity(spec.nodes.len());
    for (name, node_spec) in &spec.nodes {
      let content = match node_spec.content.as_deref() {
        None | Some("") => None,
        Some(expr) => Some(compile_expr(name, expr, &spec.nodes)?),
      };

      let inline_content = match &content {
        None => false,
        Some(expr) => {
          let mut inline = None;
          for unit in &expr.units {
            for referenced in &unit.names {
              let referenced_spec = &spec.nodes[referenced.as_str()];
              let is_inline = referenced_spec.inline || referenced_spec.text;
              match inline {
                None => inline = Some(is_inline),
                Some(prev) if prev != is_inline => {
                  return Err(SchemaError::MixedContent { node: name.clone() });
                },
                Some(_) => {},
              }
            }
          }
          inline.unwrap_or(false)
        },
      };

      let marks = match node_spec.marks.as_deref() {
        None => {
          // Textblocks hold marked text, so they default to allowing marks
          // just like inline types do.
          if node_spec.inline || node_spec.text || inline_content {
            MarkAllowance::All
          } else {
            MarkAllowance::None
          }
        },
        Some("") => MarkAllowance::None,
        Some("_") => MarkAllowance::All,
        Some(list) => {
          let names: Vec<String> = list.split_whitespace().map(str::to_owned).collect();
          for mark in &names {
            if !spec.marks.contains_key(mark) {
              return Err(SchemaError::UnknownMarkType(mark.clone()));
            }
          }
          MarkAllowance::Only(names)
        },
      };

      nodes.insert(
        name.clone(),
        Arc::new(NodeType {
          name: name.clone(),
          spec: node_spec.clone(),
          content,
          marks,
          inline_content,
        }),
      );
    }

    let mut marks = IndexMap::with_capacity(spec.marks.len());
    for (name, mark_spec) in &spec.marks {
      for excluded in &mark_spec.excludes {
        if !spec.marks.contains_key(excluded) {
          return Err(SchemaError::UnknownMarkType(excluded.clone()));
        }
      }
      marks.insert(
        name.clone(),
        Arc::new(MarkType {
          name:     name.clone(),
          spec:     mark_spec.clone(),
          excluded: mark_spec.excludes.clone(),
        }),
      );
    }
    check_exclusivity_cycles(&spec.marks)?;

    let doc_type = Arc::clone(&nodes["doc"]);
    let text_type = Arc::clone(&nodes["text"]);
    debug!(nodes = nodes.len(), marks = marks.len(), "compiled schema");

    Ok(Schema {
      inner: Arc::new(SchemaInner {
        nodes,
        marks,
        doc_type,
        text_type,
      }),
    })
  }

  pub fn node_type(&self, name: &str) -> Result<&Arc<NodeType>> {
    self
      .inner
      .nodes
      .get(name)
      .ok_or_else(|| SchemaError::UnknownNodeType(name.to_owned()))
  }

  pub fn mark_type(&self, name: &str) -> Result<&Arc<MarkType>> {
    self
      .inner
      .marks
      .get(name)
      .ok_or_else(|| SchemaError::UnknownMarkType(name.to_owned()))
  }

  pub fn node_types(&self) -> impl Iterator<Item = &Arc<NodeType>> {
    self.inner.nodes.values()
  }

  pub fn mark_types(&self) -> impl Iterator<Item = &Arc<MarkType>> {
    self.inner.marks.values()
  }

  pub fn node_type_by_tag(&self, tag: &str) -> Option<&Arc<NodeType>> {
    self
      .inner
      .nodes
      .values()
      .find(|t| t.spec.tag.as_deref() == Some(tag))
  }

  pub fn mark_type_by_tag(&self, tag: &str) -> Option<&Arc<MarkType>> {
    self
      .inner
      .marks
      .values()
      .find(|t| t.spec.tag.as_deref() == Some(tag))
  }

  /// Build a node of the named type, validating attributes and content.
  pub fn node(
    &self,
    name: &str,
    attrs: Option<&Attrs>,
    content: impl Into<Fragment>,
  ) -> Result<Node> {
    let node_type = self.node_type(name)?;
    if node_type.is_text() {
      // Text nodes carry a payload, not children.
      return Err(SchemaError::TextWithContent {
        name: name.to_owned(),
      });
    }
    let attrs = node_type.compute_attrs(attrs)?;
    let content = content.into();
    if !node_type.valid_content(&content) {
      return Err(
        InvalidContent {
          parent: name.to_owned(),
        }
        .into(),
      );
    }
    for child in content.iter() {
      for mark in child.marks().iter() {
        if !node_type.allows_mark(mark.type_name()) {
          return Err(SchemaError::MarkNotAllowed {
            node: name.to_owned(),
            mark: mark.type_name().to_owned(),
          });
        }
      }
    }
    Ok(Node::new(
      Arc::clone(node_type),
      Arc::new(attrs),
      content,
      MarkSet::empty(),
    ))
  }

  /// Build a text node. Empty text nodes are not representable; callers
  /// should skip empty strings.
  pub fn text(&self, text: impl Into<Text>) -> Node {
    Node::new_text(
      Arc::clone(&self.inner.text_type),
      text.into(),
      MarkSet::empty(),
    )
  }

  pub fn text_with_marks(&self, text: impl Into<Text>, marks: MarkSet) -> Node {
    Node::new_text(Arc::clone(&self.inner.text_type), text.into(), marks)
  }

  /// Build a mark instance of the named type.
  pub fn mark(&self, name: &str, attrs: Option<&Attrs>) -> Result<Mark> {
    let mark_type = self.mark_type(name)?;
    let attrs = mark_type.compute_attrs(attrs)?;
    Ok(Mark::new(Arc::clone(mark_type), Arc::new(attrs)))
  }

  /// Build the smallest document satisfying the schema: required terms are
  /// filled with the first accepted type that can itself be defaulted,
  /// recursively.
  pub fn default_doc(&self) -> Result<Node> {
    self.default_node(&self.inner.doc_type, 0)
  }

  fn default_node(&self, node_type: &Arc<NodeType>, depth: usize) -> Result<Node> {
    if depth > 16 {
      return Err(SchemaError::NoDefaultContent {
        node: node_type.name.clone(),
      });
    }
    let mut children = Vec::new();
    if let Some(expr) = &node_type.content {
      for unit in &expr.units {
        if !unit.min_one {
          continue;
        }
        // Try every type the term accepts: the first may itself be
        // unfillable (recursive, or a text type, which is never empty).
        let mut filled = None;
        for name in &unit.names {
          let child_type = self.node_type(name)?;
          if child_type.is_text() {
            continue;
          }
          if let Ok(child) = self.default_node(&Arc::clone(child_type), depth + 1) {
            filled = Some(child);
            break;
          }
        }
        match filled {
          Some(child) => children.push(child),
          None => {
            return Err(SchemaError::NoDefaultContent {
              node: node_type.name.clone(),
            });
          },
        }
      }
    }
    let attrs = node_type.compute_attrs(None)?;
    let content = Fragment::from_nodes(children);
    if !node_type.valid_content(&content) {
      return Err(SchemaError::NoDefaultContent {
        node: node_type.name.clone(),
      });
    }
    Ok(Node::new(
      Arc::clone(node_type),
      Arc::new(attrs),
      content,
      MarkSet::empty(),
    ))
  }
}

fn compile_expr(
  owner: &str,
  expr: &str,
  nodes: &IndexMap<String, NodeSpec>,
) -> Result<ContentExpr> {
  let mut units = Vec::new();
  let bytes = expr.as_bytes();
  let mut i = 0;

  let invalid = |offset: usize, message: &str| SchemaError::InvalidExpr {
    node: owner.to_owned(),
    offset,
    message: message.to_owned(),
  };

  while i < bytes.len() {
    if bytes[i].is_ascii_whitespace() {
      i += 1;
      continue;
    }

    let mut raw_names = Vec::new();
    if bytes[i] == b'(' {
      i += 1;
      loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
          i += 1;
        }
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
          i += 1;
        }
        if start == i {
          return Err(invalid(i, "expected a name"));
        }
        raw_names.push(expr[start..i].to_owned());
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
          i += 1;
        }
        match bytes.get(i) {
          Some(b'|') => i += 1,
          Some(b')') => {
            i += 1;
            break;
          },
          _ => return Err(invalid(i, "expected `|` or `)`")),
        }
      }
    } else {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
      }
      if start == i {
        return Err(invalid(i, "unexpected character"));
      }
      raw_names.push(expr[start..i].to_owned());
    }

    let (min_one, many) = match bytes.get(i) {
      Some(b'?') => {
        i += 1;
        (false, false)
      },
      Some(b'*') => {
        i += 1;
        (false, true)
      },
      Some(b'+') => {
        i += 1;
        (true, true)
      },
      _ => (true, false),
    };

    // Resolve type and group names into concrete type names.
    let mut names = Vec::new();
    for raw in &raw_names {
      if nodes.contains_key(raw.as_str()) {
        if !names.contains(raw) {
          names.push(raw.clone());
        }
        continue;
      }
      let mut matched = false;
      for (type_name, node_spec) in nodes {
        let in_group = node_spec
          .group
          .as_deref()
          .is_some_and(|groups| groups.split_whitespace().any(|g| g == raw));
        if in_group {
          matched = true;
          if !names.contains(type_name) {
            names.push(type_name.clone());
          }
        }
      }
      if !matched {
        return Err(SchemaError::UnknownContentRef {
          node: owner.to_owned(),
          name: raw.clone(),
        });
      }
    }

    units.push(Unit {
      names,
      min_one,
      many,
    });
  }

  Ok(ContentExpr { units })
}

/// Reject exclusivity cycles among distinct marks. Self-exclusion is fine
/// (a mark replacing an older instance of itself).
fn check_exclusivity_cycles(marks: &IndexMap<String, MarkSpec>) -> Result<()> {
  for start in marks.keys() {
    let mut stack = vec![start.as_str()];
    let mut visited: Vec<&str> = Vec::new();
    while let Some(current) = stack.pop() {
      if let Some(spec) = marks.get(current) {
        for next in &spec.excludes {
          if next == current {
            continue;
          }
          if next == start {
            return Err(SchemaError::ExclusivityCycle {
              mark: start.clone(),
            });
          }
          if !visited.contains(&next.as_str()) {
            visited.push(next);
            stack.push(next);
          }
        }
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use serde_json::json;

  use super::*;

  fn basic_spec() -> SchemaSpec {
    let mut nodes = IndexMap::new();
    nodes.insert("doc".into(), NodeSpec {
      content: Some("block+".into()),
      ..Default::default()
    });
    nodes.insert("paragraph".into(), NodeSpec {
      content: Some("text*".into()),
      group: Some("block".into()),
      tag: Some("p".into()),
      ..Default::default()
    });
    nodes.insert("heading".into(), NodeSpec {
      content: Some("text*".into()),
      group: Some("block".into()),
      attrs: [("level".to_owned(), AttrSpec {
        default: Some(json!(1)),
      })]
      .into_iter()
      .collect(),
      ..Default::default()
    });
    nodes.insert("text".into(), NodeSpec {
      text: true,
      ..Default::default()
    });

    let mut marks = IndexMap::new();
    marks.insert("bold".into(), MarkSpec {
      tag: Some("b".into()),
      ..Default::default()
    });
    marks.insert("link".into(), MarkSpec {
      attrs: [("href".to_owned(), AttrSpec::default())]
        .into_iter()
        .collect(),
      ..Default::default()
    });

    SchemaSpec { nodes, marks }
  }

  #[test]
  fn compiles_basic_schema() {
    let schema = Schema::new(basic_spec()).unwrap();
    assert!(schema.node_type("paragraph").is_ok());
    assert!(schema.node_type("list").is_err());
    assert!(schema.mark_type("bold").is_ok());
  }

  #[test]
  fn requires_doc_and_text() {
    let mut spec = basic_spec();
    spec.nodes.shift_remove("doc");
    assert!(matches!(
      Schema::new(spec),
      Err(SchemaError::MissingNodeType(name)) if name == "doc"
    ));

    let mut spec = basic_spec();
    spec.nodes.shift_remove("text");
    assert!(matches!(
      Schema::new(spec),
      Err(SchemaError::MissingNodeType(name)) if name == "text"
    ));
  }

  #[test]
  fn rejects_unknown_content_ref() {
    let mut spec = basic_spec();
    spec.nodes.insert("aside".into(), NodeSpec {
      content: Some("sidebar+".into()),
      ..Default::default()
    });
    assert!(matches!(
      Schema::new(spec),
      Err(SchemaError::UnknownContentRef { node, name })
        if node == "aside" && name == "sidebar"
    ));
  }

  #[test]
  fn rejects_text_with_content() {
    let mut spec = basic_spec();
    spec.nodes.get_mut("text").unwrap().content = Some("block*".into());
    assert!(matches!(
      Schema::new(spec),
      Err(SchemaError::TextWithContent { .. })
    ));
  }

  #[test]
  fn rejects_mixed_content() {
    let mut spec = basic_spec();
    spec.nodes.insert("weird".into(), NodeSpec {
      content: Some("paragraph text*".into()),
      ..Default::default()
    });
    assert!(matches!(
      Schema::new(spec),
      Err(SchemaError::MixedContent { .. })
    ));
  }

  #[test]
  fn rejects_exclusivity_cycle() {
    let mut spec = basic_spec();
    spec.marks.insert("em".into(), MarkSpec {
      excludes: vec!["strong".into()],
      ..Default::default()
    });
    spec.marks.insert("strong".into(), MarkSpec {
      excludes: vec!["em".into()],
      ..Default::default()
    });
    assert!(matches!(
      Schema::new(spec),
      Err(SchemaError::ExclusivityCycle { .. })
    ));
  }

  #[test]
  fn self_exclusion_is_allowed() {
    let mut spec = basic_spec();
    spec.marks.insert("comment".into(), MarkSpec {
      excludes: vec!["comment".into()],
      ..Default::default()
    });
    assert!(Schema::new(spec).is_ok());
  }

  #[test]
  fn grammar_matching() {
    let schema = Schema::new(basic_spec()).unwrap();
    let doc = schema.node_type("doc").unwrap();

    assert!(!doc.valid_content(&Fragment::empty()));

    let para = schema.node("paragraph", None, Fragment::empty()).unwrap();
    let heading = schema.node("heading", None, Fragment::empty()).unwrap();
    assert!(doc.valid_content(&Fragment::from_nodes(vec![para.clone()])));
    assert!(doc.valid_content(&Fragment::from_nodes(vec![para.clone(), heading])));
    assert!(!doc.valid_content(&Fragment::from_nodes(vec![schema.text("loose")])));
  }

  #[test]
  fn grammar_choice_and_optional() {
    let mut spec = basic_spec();
    spec.nodes.insert("figure".into(), NodeSpec {
      content: Some("(paragraph | heading) heading?".into()),
      ..Default::default()
    });
    let schema = Schema::new(spec).unwrap();
    let figure = schema.node_type("figure").unwrap();

    let para = schema.node("paragraph", None, Fragment::empty()).unwrap();
    let heading = schema.node("heading", None, Fragment::empty()).unwrap();

    assert!(figure.valid_content(&Fragment::from_nodes(vec![para.clone()])));
    assert!(figure.valid_content(&Fragment::from_nodes(vec![heading.clone()])));
    assert!(figure.valid_content(&Fragment::from_nodes(vec![para.clone(), heading.clone()])));
    assert!(!figure.valid_content(&Fragment::empty()));
    assert!(!figure.valid_content(&Fragment::from_nodes(vec![
      para.clone(),
      heading.clone(),
      heading,
    ])));
  }

  #[test]
  fn attr_defaults_and_required() {
    let schema = Schema::new(basic_spec()).unwrap();
    let heading = schema.node_type("heading").unwrap();

    let attrs = heading.compute_attrs(None).unwrap();
    assert_eq!(attrs["level"], json!(1));

    let given: Attrs = [("level".to_owned(), json!(2))].into_iter().collect();
    let attrs = heading.compute_attrs(Some(&given)).unwrap();
    assert_eq!(attrs["level"], json!(2));

    let bogus: Attrs = [("depth".to_owned(), json!(2))].into_iter().collect();
    assert!(matches!(
      heading.compute_attrs(Some(&bogus)),
      Err(SchemaError::UnknownAttr { .. })
    ));

    assert!(matches!(
      schema.mark("link", None),
      Err(SchemaError::MissingAttr { .. })
    ));
  }

  #[test]
  fn default_doc_fills_required_terms() {
    let schema = Schema::new(basic_spec()).unwrap();
    let doc = schema.default_doc().unwrap();
    assert_eq!(doc.child_count(), 1);
    assert_eq!(doc.child(0).unwrap().type_name(), "paragraph");
  }

  #[test]
  fn default_doc_skips_unfillable_group_members() {
    // "aside" is declared before "paragraph" and recurses into its own
    // group, so filling it bottoms out; the default must fall through to
    // the next member instead of giving up.
    let mut nodes = IndexMap::new();
    nodes.insert("doc".into(), NodeSpec {
      content: Some("block+".into()),
      ..Default::default()
    });
    nodes.insert("aside".into(), NodeSpec {
      content: Some("block+".into()),
      group: Some("block".into()),
      ..Default::default()
    });
    nodes.insert("paragraph".into(), NodeSpec {
      content: Some("text*".into()),
      group: Some("block".into()),
      ..Default::default()
    });
    nodes.insert("text".into(), NodeSpec {
      text: true,
      ..Default::default()
    });
    let schema = Schema::new(SchemaSpec {
      nodes,
      marks: IndexMap::new(),
    })
    .unwrap();

    let doc = schema.default_doc().unwrap();
    assert_eq!(doc.child_count(), 1);
    assert_eq!(doc.child(0).unwrap().type_name(), "paragraph");
  }

  #[test]
  fn textblocks_allow_marks_by_default() {
    let schema = Schema::new(basic_spec()).unwrap();
    assert!(schema.node_type("paragraph").unwrap().allows_mark("bold"));
    assert!(schema.node_type("heading").unwrap().allows_mark("bold"));
    assert!(!schema.node_type("doc").unwrap().allows_mark("bold"));
  }

  #[test]
  fn disallowed_child_marks_are_rejected() {
    let mut spec = basic_spec();
    spec.nodes.get_mut("heading").unwrap().marks = Some("".into());
    let schema = Schema::new(spec).unwrap();

    let bold = schema.mark("bold", None).unwrap();
    let text = schema.text_with_marks("x", MarkSet::from_marks([bold]));
    assert!(matches!(
      schema.node("heading", None, Fragment::from(text)),
      Err(SchemaError::MarkNotAllowed { node, mark })
        if node == "heading" && mark == "bold"
    ));
  }

  #[test]
  fn invalid_node_content_is_rejected() {
    let schema = Schema::new(basic_spec()).unwrap();
    let err = schema
      .node("doc", None, Fragment::from_nodes(vec![schema.text("x")]))
      .unwrap_err();
    assert_eq!(err, SchemaError::Content(InvalidContent {
      parent: "doc".into()
    }));
  }
}
