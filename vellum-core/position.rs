//! Position resolution.
//!
//! A bare integer position says little by itself; [`ResolvedPos`] pins it to
//! the tree: the chain of ancestors it sits inside, the index and offset
//! within its parent, and whether it falls mid-text. Resolution is O(depth ×
//! child count) and allocates only the ancestor path.

use crate::node::{
  MarkSet,
  Node,
};

pub type Result<T> = std::result::Result<T, PositionError>;

/// A position outside the document's addressable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("position {pos} is outside the document (valid range 0..={size})")]
pub struct PositionError {
  pub pos:  usize,
  pub size: usize,
}

/// A position with its ancestor chain. Depth 0 is the document root; the
/// deepest entry is the node the position points directly into.
#[derive(Debug, Clone)]
pub struct ResolvedPos {
  pos:           usize,
  /// One `(node, child index, absolute content start)` entry per depth.
  path:          Vec<(Node, usize, usize)>,
  parent_offset: usize,
  text_offset:   usize,
}

impl Node {
  /// Resolve a position against this node as document root.
  pub fn resolve(&self, pos: usize) -> Result<ResolvedPos> {
    let size = self.content_size();
    if pos > size {
      return Err(PositionError { pos, size });
    }

    let mut path: Vec<(Node, usize, usize)> = Vec::new();
    let mut cur = self.clone();
    let mut start = 0; // absolute position where cur's content begins
    let mut offset = pos; // offset of pos within cur's content
    let mut text_offset = 0;
    loop {
      let (index, child_start) = cur.content().find_index(offset);
      let rem = offset - child_start;
      path.push((cur.clone(), index, start));
      if rem == 0 {
        break;
      }
      let child = match cur.child(index) {
        Some(child) => child.clone(),
        None => break,
      };
      if child.is_leaf() {
        // Strictly inside a text run.
        text_offset = rem;
        break;
      }
      start = start + child_start + 1;
      offset = rem - 1;
      cur = child;
    }

    let parent_offset = offset;
    Ok(ResolvedPos {
      pos,
      path,
      parent_offset,
      text_offset,
    })
  }
}

impl ResolvedPos {
  pub fn pos(&self) -> usize {
    self.pos
  }

  /// Number of ancestors above the parent; 0 means the position sits
  /// directly in the document root.
  pub fn depth(&self) -> usize {
    self.path.len() - 1
  }

  /// The ancestor at `depth`. Panics if `depth > self.depth()`.
  pub fn node(&self, depth: usize) -> &Node {
    &self.path[depth].0
  }

  /// Child index at `depth`: how many children of that ancestor precede the
  /// position.
  pub fn index(&self, depth: usize) -> usize {
    self.path[depth].1
  }

  /// Absolute position where the content of the ancestor at `depth` starts.
  pub fn start(&self, depth: usize) -> usize {
    self.path[depth].2
  }

  /// Absolute position where the content of the ancestor at `depth` ends.
  pub fn end(&self, depth: usize) -> usize {
    self.start(depth) + self.node(depth).content_size()
  }

  /// Position directly before the ancestor at `depth`; `None` at the root,
  /// which has no outside.
  pub fn before(&self, depth: usize) -> Option<usize> {
    if depth == 0 {
      None
    } else {
      Some(self.start(depth) - 1)
    }
  }

  /// Position directly after the ancestor at `depth`.
  pub fn after(&self, depth: usize) -> Option<usize> {
    if depth == 0 {
      None
    } else {
      Some(self.end(depth) + 1)
    }
  }

  /// The node the position points directly into.
  pub fn parent(&self) -> &Node {
    self.node(self.depth())
  }

  /// Offset of the position within its parent's content.
  pub fn parent_offset(&self) -> usize {
    self.parent_offset
  }

  /// Nonzero when the position falls strictly inside a text run.
  pub fn text_offset(&self) -> usize {
    self.text_offset
  }

  /// The node directly after the position; mid-text this is the remainder of
  /// the run.
  pub fn node_after(&self) -> Option<Node> {
    let parent = self.parent();
    let index = self.index(self.depth());
    let child = parent.child(index)?;
    if self.text_offset > 0 {
      Some(child.cut(self.text_offset, child.size()))
    } else {
      Some(child.clone())
    }
  }

  /// The node directly before the position; mid-text this is the head of the
  /// run.
  pub fn node_before(&self) -> Option<Node> {
    let parent = self.parent();
    let index = self.index(self.depth());
    if self.text_offset > 0 {
      let child = parent.child(index)?;
      Some(child.cut(0, self.text_offset))
    } else if index == 0 {
      None
    } else {
      parent.child(index - 1).cloned()
    }
  }

  /// Marks that new text inserted here would inherit: the marks of the run
  /// before the position, or of the run after it at the start of a parent.
  pub fn marks(&self) -> MarkSet {
    let primary = if self.text_offset > 0 || self.index(self.depth()) > 0 {
      self.node_before()
    } else {
      self.node_after()
    };
    match primary {
      Some(node) if node.is_inline() => node.marks().clone(),
      _ => MarkSet::empty(),
    }
  }

  /// The deepest depth at which this position and `other` share an ancestor.
  /// Both must be resolved against the same document.
  pub fn shared_depth(&self, other: &ResolvedPos) -> usize {
    let mut depth = self.depth().min(other.depth());
    while depth > 0 && self.start(depth) != other.start(depth) {
      depth -= 1;
    }
    depth
  }
}

#[cfg(test)]
mod test {
  use crate::testutil::{
    doc,
    p,
    schema,
  };

  #[test]
  fn resolve_boundary_and_mid_text() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello"), p(&schema, "world")]);

    // Start of the document.
    let rp = document.resolve(0).unwrap();
    assert_eq!(rp.depth(), 0);
    assert_eq!(rp.index(0), 0);
    assert_eq!(rp.parent().type_name(), "doc");

    // Mid-text inside the first paragraph.
    let rp = document.resolve(3).unwrap();
    assert_eq!(rp.depth(), 1);
    assert_eq!(rp.parent().type_name(), "paragraph");
    assert_eq!(rp.parent_offset(), 2);
    assert_eq!(rp.text_offset(), 2);
    assert_eq!(rp.start(1), 1);
    assert_eq!(rp.end(1), 6);
    assert_eq!(rp.before(1), Some(0));
    assert_eq!(rp.after(1), Some(7));

    // Between the two paragraphs: the parent is the root.
    let rp = document.resolve(7).unwrap();
    assert_eq!(rp.depth(), 0);
    assert_eq!(rp.index(0), 1);
  }

  #[test]
  fn mid_text_neighbors_are_cut_runs() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);

    let rp = document.resolve(3).unwrap();
    assert_eq!(rp.node_before().unwrap().text(), Some("he"));
    assert_eq!(rp.node_after().unwrap().text(), Some("llo"));
  }

  #[test]
  fn out_of_range_is_an_error() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hi")]);
    assert_eq!(document.content_size(), 4);

    assert!(document.resolve(4).is_ok());
    let err = document.resolve(5).unwrap_err();
    assert_eq!(err.pos, 5);
    assert_eq!(err.size, 4);
  }

  #[test]
  fn shared_depth() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello"), p(&schema, "world")]);

    let a = document.resolve(2).unwrap();
    let b = document.resolve(4).unwrap();
    assert_eq!(a.shared_depth(&b), 1);

    let c = document.resolve(9).unwrap();
    assert_eq!(a.shared_depth(&c), 0);
  }

  #[test]
  fn marks_at_position() {
    use crate::node::{
      Fragment,
      MarkSet,
    };

    let schema = schema();
    let bold = schema.mark("bold", None).unwrap();
    let para = schema
      .node(
        "paragraph",
        None,
        Fragment::from_nodes(vec![
          schema.text("ab"),
          schema.text_with_marks("cd", MarkSet::from_marks([bold])),
        ]),
      )
      .unwrap();
    let document = doc(&schema, vec![para]);

    // After the plain run: plain marks.
    assert!(document.resolve(2).unwrap().marks().is_empty());
    // Inside the bold run.
    assert!(
      document
        .resolve(4)
        .unwrap()
        .marks()
        .contains_type("bold")
    );
  }
}
