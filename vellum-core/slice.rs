//! Document slices.
//!
//! A [`Slice`] is a fragment plus two open depths. When a range's boundary
//! cuts through a node, the slice keeps that node but marks it "open" on
//! that side: `open_start` counts how many node boundaries the left edge cut
//! through, `open_end` the right. A slice with both depths zero is a plain
//! sequence of whole nodes.

use crate::{
  node::{
    Fragment,
    Node,
  },
  position::Result,
};

/// A piece of a document, possibly open on either side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Slice {
  content:    Fragment,
  open_start: usize,
  open_end:   usize,
}

impl Slice {
  pub fn new(content: Fragment, open_start: usize, open_end: usize) -> Slice {
    Slice {
      content,
      open_start,
      open_end,
    }
  }

  pub fn empty() -> Slice {
    Slice::default()
  }

  pub fn content(&self) -> &Fragment {
    &self.content
  }

  pub fn open_start(&self) -> usize {
    self.open_start
  }

  pub fn open_end(&self) -> usize {
    self.open_end
  }

  /// The number of positions the slice covers once inserted: the open node
  /// boundaries on each side don't count, they join with existing nodes.
  pub fn size(&self) -> usize {
    self.content.size() - self.open_start - self.open_end
  }

  pub fn is_empty(&self) -> bool {
    self.content.is_empty()
  }
}

impl Node {
  /// The part of the document between two positions, with boundary-crossing
  /// ancestors left open.
  pub fn slice(&self, from: usize, to: usize) -> Result<Slice> {
    let rf = self.resolve(from)?;
    let rt = self.resolve(to)?;
    if from == to {
      return Ok(Slice::empty());
    }

    let depth = rf.shared_depth(&rt);
    let start = rf.start(depth);
    let content = rf.node(depth).content().cut(from - start, to - start);
    Ok(Slice::new(content, rf.depth() - depth, rt.depth() - depth))
  }
}
