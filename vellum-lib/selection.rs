//! Selections.
//!
//! A selection is either a text range (anchor and head, which may coincide
//! for a caret, and may be inverted when selecting backwards) or a whole
//! non-text node. Constructors validate against a concrete document;
//! remapping through edits never fails, it degrades: a deleted node
//! selection becomes a caret clamped to the nearest surviving boundary.

use vellum_core::{
  node::Node,
  position::PositionError,
};

use crate::step::{
  Assoc,
  Mapping,
};

pub type Result<T> = std::result::Result<T, SelectionError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SelectionError {
  #[error("no selectable node at position {pos}")]
  NotSelectable { pos: usize },

  #[error(transparent)]
  Position(#[from] PositionError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
  /// A range between two resolvable positions. `head` is the moving end.
  Text { anchor: usize, head: usize },
  /// A whole non-text node, addressed by the position before it.
  Node { pos: usize, size: usize },
}

impl Selection {
  /// A text selection; both endpoints must resolve in `doc`.
  pub fn text(doc: &Node, anchor: usize, head: usize) -> Result<Selection> {
    doc.resolve(anchor)?;
    doc.resolve(head)?;
    Ok(Selection::Text { anchor, head })
  }

  /// A caret at `pos`.
  pub fn caret(doc: &Node, pos: usize) -> Result<Selection> {
    Selection::text(doc, pos, pos)
  }

  /// Select the non-text node starting at `pos`.
  pub fn node(doc: &Node, pos: usize) -> Result<Selection> {
    let rp = doc.resolve(pos)?;
    if rp.text_offset() > 0 {
      return Err(SelectionError::NotSelectable { pos });
    }
    match rp.node_after() {
      Some(node) if !node.is_text() => Ok(Selection::Node {
        pos,
        size: node.size(),
      }),
      _ => Err(SelectionError::NotSelectable { pos }),
    }
  }

  /// A caret at the first inline position of the document.
  pub fn at_start(doc: &Node) -> Selection {
    let mut pos = 0;
    let mut node = doc.clone();
    while !node.inline_content() {
      match node.child(0) {
        Some(child) if !child.is_leaf() => {
          pos += 1;
          node = child.clone();
        },
        _ => break,
      }
    }
    Selection::Text {
      anchor: pos,
      head:   pos,
    }
  }

  /// A caret at the last inline position of the document.
  pub fn at_end(doc: &Node) -> Selection {
    let mut pos = doc.content_size();
    let mut node = doc.clone();
    while !node.inline_content() {
      match node.child(node.child_count().wrapping_sub(1)) {
        Some(child) if !child.is_leaf() => {
          pos -= 1;
          node = child.clone();
        },
        _ => break,
      }
    }
    Selection::Text {
      anchor: pos,
      head:   pos,
    }
  }

  pub fn anchor(&self) -> usize {
    match self {
      Selection::Text { anchor, .. } => *anchor,
      Selection::Node { pos, .. } => *pos,
    }
  }

  pub fn head(&self) -> usize {
    match self {
      Selection::Text { head, .. } => *head,
      Selection::Node { pos, size } => *pos + *size,
    }
  }

  /// Lower end of the covered range.
  pub fn from(&self) -> usize {
    match self {
      Selection::Text { anchor, head } => (*anchor).min(*head),
      Selection::Node { pos, .. } => *pos,
    }
  }

  /// Upper end of the covered range.
  pub fn to(&self) -> usize {
    match self {
      Selection::Text { anchor, head } => (*anchor).max(*head),
      Selection::Node { pos, size } => *pos + *size,
    }
  }

  /// Whether nothing is covered (a caret).
  pub fn is_empty(&self) -> bool {
    self.from() == self.to()
  }

  /// Remap through `mapping` onto `doc` (the document the mapping leads
  /// to). Never fails: positions are clamped, and a node selection whose
  /// node went away degrades to a caret.
  pub fn map(&self, mapping: &Mapping, doc: &Node) -> Selection {
    self.map_bias(mapping, doc, Assoc::After)
  }

  /// Like [`Selection::map`], with an explicit side for positions that sat
  /// inside replaced content.
  pub fn map_bias(&self, mapping: &Mapping, doc: &Node, bias: Assoc) -> Selection {
    let size = doc.content_size();
    match self {
      Selection::Text { anchor, head } => Selection::Text {
        anchor: mapping.map_pos(*anchor, bias).min(size),
        head:   mapping.map_pos(*head, bias).min(size),
      },
      Selection::Node { pos, .. } => {
        let mapped = mapping.map_result(*pos, bias);
        if !mapped.deleted {
          if let Ok(selection) = Selection::node(doc, mapped.pos) {
            return selection;
          }
        }
        let pos = mapped.pos.min(size);
        Selection::Text {
          anchor: pos,
          head:   pos,
        }
      },
    }
  }
}
