//! Immutable document tree: [`Node`], [`Fragment`], [`Mark`] and [`MarkSet`].
//!
//! Nodes are persistent values. Every node is a cheap handle onto shared
//! data, so "modifying" a document builds a new tree that reuses every
//! untouched subtree by reference; allocation is bounded by the depth and
//! width of the edit, not the document size.
//!
//! # Positions
//!
//! Positions are integers over the flattened tree. A text node occupies one
//! position per character, a non-text leaf occupies one position, and every
//! other node occupies its content size plus two (one token each for entering
//! and leaving it). The document root's open and close tokens are not
//! addressable: valid positions in a document run from `0` to
//! `doc.content_size()`.
//!
//! # Mark sets
//!
//! The marks on a text run form a set ordered by type name. Adding a mark
//! drops the marks its type excludes (always including older instances of
//! itself); adjoining text runs with identical sets are coalesced whenever a
//! fragment is built.

use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;

use crate::{
  Text,
  schema::{
    Attrs,
    InvalidContent,
    MarkType,
    NodeType,
    SchemaError,
  },
};

/// A mark instance: a type plus attribute values.
#[derive(Debug, Clone)]
pub struct Mark {
  mark_type: Arc<MarkType>,
  attrs:     Arc<Attrs>,
}

impl Mark {
  pub(crate) fn new(mark_type: Arc<MarkType>, attrs: Arc<Attrs>) -> Mark {
    Mark { mark_type, attrs }
  }

  pub fn mark_type(&self) -> &MarkType {
    &self.mark_type
  }

  pub fn type_name(&self) -> &str {
    self.mark_type.name()
  }

  pub fn attrs(&self) -> &Attrs {
    &self.attrs
  }

  pub fn attr(&self, name: &str) -> Option<&Value> {
    self.attrs.get(name)
  }
}

impl PartialEq for Mark {
  fn eq(&self, other: &Self) -> bool {
    self.type_name() == other.type_name() && self.attrs == other.attrs
  }
}

/// An ordered set of marks, keyed by type name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkSet {
  marks: SmallVec<[Mark; 2]>,
}

impl MarkSet {
  pub fn empty() -> MarkSet {
    MarkSet::default()
  }

  pub fn from_marks(marks: impl IntoIterator<Item = Mark>) -> MarkSet {
    marks
      .into_iter()
      .fold(MarkSet::empty(), |set, mark| set.add(&mark))
  }

  /// Add a mark, dropping whatever it excludes. If an existing mark excludes
  /// the new one, the set is returned unchanged.
  pub fn add(&self, mark: &Mark) -> MarkSet {
    if self.contains(mark) {
      return self.clone();
    }
    let mut marks: SmallVec<[Mark; 2]> = SmallVec::new();
    for existing in &self.marks {
      if mark.mark_type().excludes(existing.type_name()) {
        continue;
      }
      if existing.mark_type().excludes(mark.type_name()) {
        return self.clone();
      }
      marks.push(existing.clone());
    }
    let at = marks
      .iter()
      .position(|m| m.type_name() > mark.type_name())
      .unwrap_or(marks.len());
    marks.insert(at, mark.clone());
    MarkSet { marks }
  }

  pub fn remove(&self, type_name: &str) -> MarkSet {
    MarkSet {
      marks: self
        .marks
        .iter()
        .filter(|m| m.type_name() != type_name)
        .cloned()
        .collect(),
    }
  }

  /// Exact membership: type and attributes.
  pub fn contains(&self, mark: &Mark) -> bool {
    self.marks.iter().any(|m| m == mark)
  }

  pub fn contains_type(&self, type_name: &str) -> bool {
    self.marks.iter().any(|m| m.type_name() == type_name)
  }

  pub fn get(&self, type_name: &str) -> Option<&Mark> {
    self.marks.iter().find(|m| m.type_name() == type_name)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Mark> {
    self.marks.iter()
  }

  pub fn len(&self) -> usize {
    self.marks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.marks.is_empty()
  }
}

/// An ordered sequence of nodes with a cached total size.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
  children: Arc<[Node]>,
  size:     usize,
}

impl Default for Fragment {
  fn default() -> Self {
    Fragment::empty()
  }
}

impl Fragment {
  pub fn empty() -> Fragment {
    Fragment {
      children: Arc::from(Vec::new()),
      size:     0,
    }
  }

  /// Build a fragment, coalescing adjoining text runs that carry identical
  /// mark sets and dropping empty text runs.
  pub fn from_nodes(nodes: Vec<Node>) -> Fragment {
    let mut children: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
      if node.is_text() && node.size() == 0 {
        continue;
      }
      if let (Some(last), Some(tail)) = (children.last(), node.text()) {
        if last.is_text() && last.marks() == node.marks() {
          let mut joined = Text::from(last.text().unwrap_or(""));
          joined.push_str(tail);
          let merged = last.with_text(joined);
          let index = children.len() - 1;
          children[index] = merged;
          continue;
        }
      }
      children.push(node);
    }
    let size = children.iter().map(Node::size).sum();
    Fragment {
      children: children.into(),
      size,
    }
  }

  pub fn size(&self) -> usize {
    self.size
  }

  pub fn count(&self) -> usize {
    self.children.len()
  }

  pub fn child(&self, index: usize) -> Option<&Node> {
    self.children.get(index)
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Node> {
    self.children.iter()
  }

  pub fn is_empty(&self) -> bool {
    self.children.is_empty()
  }

  pub fn append(&self, other: &Fragment) -> Fragment {
    if other.is_empty() {
      return self.clone();
    }
    if self.is_empty() {
      return other.clone();
    }
    Fragment::from_nodes(self.iter().chain(other.iter()).cloned().collect())
  }

  /// Replace the child at `index`, keeping every sibling shared.
  pub fn replace_child(&self, index: usize, node: Node) -> Fragment {
    let mut children: Vec<Node> = self.children.to_vec();
    children[index] = node;
    Fragment::from_nodes(children)
  }

  /// The sub-sequence between two offsets into this fragment, opening nodes
  /// that the boundaries cut through.
  pub fn cut(&self, from: usize, to: usize) -> Fragment {
    if from == 0 && to == self.size {
      return self.clone();
    }
    let mut result = Vec::new();
    let mut pos = 0;
    for child in self.iter() {
      if pos >= to {
        break;
      }
      let end = pos + child.size();
      if end > from {
        if pos >= from && end <= to {
          result.push(child.clone());
        } else if child.is_text() {
          let start = from.saturating_sub(pos);
          let stop = (to - pos).min(child.size());
          result.push(child.cut(start, stop));
        } else if !child.is_leaf() {
          let inner_from = from.saturating_sub(pos + 1);
          let inner_to = (to.saturating_sub(pos + 1)).min(child.content_size());
          result.push(child.with_content_raw(child.content().cut(inner_from, inner_to)));
        }
        // A partially covered non-text leaf cannot happen: its size is 1.
      }
      pos = end;
    }
    Fragment::from_nodes(result)
  }

  /// Locate the child at an offset: returns `(index, child start)`, where
  /// `pos == child start` means the position sits on the boundary before
  /// that child (`index == count` at the very end).
  pub(crate) fn find_index(&self, pos: usize) -> (usize, usize) {
    let mut start = 0;
    for (index, child) in self.children.iter().enumerate() {
      if pos == start {
        return (index, start);
      }
      let end = start + child.size();
      if pos < end {
        return (index, start);
      }
      start = end;
    }
    (self.children.len(), self.size)
  }
}

impl From<Vec<Node>> for Fragment {
  fn from(nodes: Vec<Node>) -> Fragment {
    Fragment::from_nodes(nodes)
  }
}

impl From<Node> for Fragment {
  fn from(node: Node) -> Fragment {
    Fragment::from_nodes(vec![node])
  }
}

#[derive(Debug)]
struct NodeData {
  node_type: Arc<NodeType>,
  attrs:     Arc<Attrs>,
  content:   Fragment,
  marks:     MarkSet,
  text:      Option<Text>,
  size:      usize,
}

/// A document node. Cloning is O(1); all data is shared.
#[derive(Debug, Clone)]
pub struct Node {
  data: Arc<NodeData>,
}

impl Node {
  pub(crate) fn new(
    node_type: Arc<NodeType>,
    attrs: Arc<Attrs>,
    content: Fragment,
    marks: MarkSet,
  ) -> Node {
    let size = if node_type.is_leaf() {
      1
    } else {
      content.size() + 2
    };
    Node {
      data: Arc::new(NodeData {
        node_type,
        attrs,
        content,
        marks,
        text: None,
        size,
      }),
    }
  }

  pub(crate) fn new_text(node_type: Arc<NodeType>, text: Text, marks: MarkSet) -> Node {
    let size = text.chars().count();
    Node {
      data: Arc::new(NodeData {
        node_type,
        attrs: Arc::new(Attrs::new()),
        content: Fragment::empty(),
        marks,
        text: Some(text),
        size,
      }),
    }
  }

  pub fn node_type(&self) -> &NodeType {
    &self.data.node_type
  }

  pub fn type_name(&self) -> &str {
    self.data.node_type.name()
  }

  pub fn attrs(&self) -> &Attrs {
    &self.data.attrs
  }

  pub fn attr(&self, name: &str) -> Option<&Value> {
    self.data.attrs.get(name)
  }

  pub fn marks(&self) -> &MarkSet {
    &self.data.marks
  }

  pub fn text(&self) -> Option<&str> {
    self.data.text.as_deref()
  }

  pub fn content(&self) -> &Fragment {
    &self.data.content
  }

  pub fn child_count(&self) -> usize {
    self.data.content.count()
  }

  pub fn child(&self, index: usize) -> Option<&Node> {
    self.data.content.child(index)
  }

  pub fn is_text(&self) -> bool {
    self.data.text.is_some()
  }

  pub fn is_leaf(&self) -> bool {
    self.is_text() || self.data.node_type.is_leaf()
  }

  pub fn is_inline(&self) -> bool {
    self.data.node_type.is_inline()
  }

  pub fn is_block(&self) -> bool {
    self.data.node_type.is_block()
  }

  /// Whether this node's children are inline content.
  pub fn inline_content(&self) -> bool {
    self.data.node_type.inline_content()
  }

  /// Total size in the flattened position space.
  pub fn size(&self) -> usize {
    self.data.size
  }

  /// Size of the content alone; the range of valid positions inside this
  /// node. Zero for leaves and text.
  pub fn content_size(&self) -> usize {
    if self.is_leaf() {
      0
    } else {
      self.data.content.size()
    }
  }

  /// Identity comparison: whether two handles share the same underlying
  /// allocation. Structural equality is `==`.
  pub fn same(&self, other: &Node) -> bool {
    Arc::ptr_eq(&self.data, &other.data)
  }

  /// Same node with different marks. Allowance against the node's type is
  /// the caller's concern.
  pub fn with_marks(&self, marks: MarkSet) -> Node {
    if self.data.marks == marks {
      return self.clone();
    }
    match &self.data.text {
      Some(text) => Node::new_text(Arc::clone(&self.data.node_type), text.clone(), marks),
      None => Node::new(
        Arc::clone(&self.data.node_type),
        Arc::clone(&self.data.attrs),
        self.data.content.clone(),
        marks,
      ),
    }
  }

  /// Same node with different attributes, validated against the type.
  pub fn with_attrs(&self, attrs: Option<&Attrs>) -> Result<Node, SchemaError> {
    let attrs = self.data.node_type.compute_attrs(attrs)?;
    Ok(Node {
      data: Arc::new(NodeData {
        node_type: Arc::clone(&self.data.node_type),
        attrs: Arc::new(attrs),
        content: self.data.content.clone(),
        marks: self.data.marks.clone(),
        text: self.data.text.clone(),
        size: self.data.size,
      }),
    })
  }

  /// Same node with different content, validated against the type's grammar.
  pub fn with_content(&self, content: Fragment) -> Result<Node, InvalidContent> {
    if !self.data.node_type.valid_content(&content) {
      return Err(InvalidContent {
        parent: self.type_name().to_owned(),
      });
    }
    Ok(self.with_content_raw(content))
  }

  /// Same node with different content, without grammar validation. Used by
  /// the replace machinery, which validates rebuilt parents at join points.
  pub(crate) fn with_content_raw(&self, content: Fragment) -> Node {
    Node::new(
      Arc::clone(&self.data.node_type),
      Arc::clone(&self.data.attrs),
      content,
      self.data.marks.clone(),
    )
  }

  pub(crate) fn with_text(&self, text: Text) -> Node {
    Node::new_text(
      Arc::clone(&self.data.node_type),
      text,
      self.data.marks.clone(),
    )
  }

  /// Cut a sub-node. For text nodes the offsets are character offsets into
  /// the payload; otherwise they are content offsets and boundary-crossing
  /// children are opened.
  pub fn cut(&self, from: usize, to: usize) -> Node {
    match &self.data.text {
      Some(text) => {
        if from == 0 && to >= self.data.size {
          return self.clone();
        }
        let cut: Text = text.chars().skip(from).take(to - from).collect();
        self.with_text(cut)
      },
      None => {
        if from == 0 && to >= self.content_size() {
          return self.clone();
        }
        self.with_content_raw(self.data.content.cut(from, to))
      },
    }
  }

  /// Concatenated text of all descendants.
  pub fn text_content(&self) -> String {
    let mut out = String::new();
    self.collect_text(&mut out);
    out
  }

  fn collect_text(&self, out: &mut String) {
    if let Some(text) = &self.data.text {
      out.push_str(text);
      return;
    }
    for child in self.data.content.iter() {
      child.collect_text(out);
    }
  }

  /// Text between two content offsets, ignoring non-text leaves.
  pub fn text_between(&self, from: usize, to: usize) -> String {
    let mut out = String::new();
    let mut pos = 0;
    for child in self.data.content.iter() {
      if pos >= to {
        break;
      }
      let end = pos + child.size();
      if end > from {
        if let Some(text) = child.text() {
          let start = from.saturating_sub(pos);
          let stop = (to - pos).min(child.size());
          out.extend(text.chars().skip(start).take(stop - start));
        } else if !child.is_leaf() {
          let inner_from = from.saturating_sub(pos + 1);
          let inner_to = (to.saturating_sub(pos + 1)).min(child.content_size());
          out.push_str(&child.text_between(inner_from, inner_to));
        }
      }
      pos = end;
    }
    out
  }

  /// Invoke `f` for every descendant touching the content range, passing the
  /// position before each node. Returning `false` skips the node's children.
  pub fn nodes_between(&self, from: usize, to: usize, f: &mut dyn FnMut(&Node, usize) -> bool) {
    self.nodes_between_inner(from, to, 0, f);
  }

  fn nodes_between_inner(
    &self,
    from: usize,
    to: usize,
    base: usize,
    f: &mut dyn FnMut(&Node, usize) -> bool,
  ) {
    let mut pos = 0;
    for child in self.data.content.iter() {
      if pos >= to {
        break;
      }
      let end = pos + child.size();
      if end > from {
        let descend = f(child, base + pos);
        if descend && !child.is_leaf() {
          let inner_from = from.saturating_sub(pos + 1);
          let inner_to = (to.saturating_sub(pos + 1)).min(child.content_size());
          child.nodes_between_inner(inner_from, inner_to, base + pos + 1, f);
        }
      }
      pos = end;
    }
  }

  /// The child covering (or starting at) a content offset, with its index
  /// and start offset.
  pub fn child_at(&self, pos: usize) -> Option<(usize, usize, &Node)> {
    let (index, start) = self.data.content.find_index(pos);
    self
      .data
      .content
      .child(index)
      .map(|child| (index, start, child))
  }

  /// Whether any inline node in the content range carries a mark of the
  /// given type.
  pub fn range_has_mark(&self, from: usize, to: usize, type_name: &str) -> bool {
    let mut found = false;
    self.nodes_between(from, to, &mut |node, _pos| {
      if node.marks().contains_type(type_name) {
        found = true;
      }
      !found
    });
    found
  }
}

impl PartialEq for Node {
  fn eq(&self, other: &Self) -> bool {
    if self.same(other) {
      return true;
    }
    self.type_name() == other.type_name()
      && self.data.attrs == other.data.attrs
      && self.data.marks == other.data.marks
      && self.data.text == other.data.text
      && self.data.content == other.data.content
  }
}
