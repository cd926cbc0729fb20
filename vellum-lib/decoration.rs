//! Decorations: transient visual annotations plugins lay over the document.
//!
//! Decorations never live in the document; they are recomputed or remapped
//! per state. The `spec` payload is opaque JSON the view layer interprets
//! (class names, widget identity, tooltip text).

use serde_json::Value;

use crate::step::{
  Assoc,
  Mapping,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorationKind {
  /// Anchored at a single position (`from == to`).
  Widget,
  /// Styles the inline content of a range.
  Inline,
  /// Attaches to the node spanning exactly `from..to`.
  Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoration {
  pub from: usize,
  pub to:   usize,
  pub kind: DecorationKind,
  pub spec: Value,
}

impl Decoration {
  pub fn widget(pos: usize, spec: Value) -> Decoration {
    Decoration {
      from: pos,
      to: pos,
      kind: DecorationKind::Widget,
      spec,
    }
  }

  pub fn inline(from: usize, to: usize, spec: Value) -> Decoration {
    Decoration {
      from,
      to,
      kind: DecorationKind::Inline,
      spec,
    }
  }

  pub fn node(from: usize, to: usize, spec: Value) -> Decoration {
    Decoration {
      from,
      to,
      kind: DecorationKind::Node,
      spec,
    }
  }
}

/// An ordered set of decorations, sorted by position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecorationSet {
  decorations: Vec<Decoration>,
}

impl DecorationSet {
  pub fn empty() -> DecorationSet {
    DecorationSet::default()
  }

  pub fn new(mut decorations: Vec<Decoration>) -> DecorationSet {
    decorations.sort_by_key(|d| (d.from, d.to));
    DecorationSet { decorations }
  }

  pub fn iter(&self) -> impl Iterator<Item = &Decoration> {
    self.decorations.iter()
  }

  pub fn len(&self) -> usize {
    self.decorations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.decorations.is_empty()
  }

  /// Decorations touching the range (widgets inclusively at its edges).
  pub fn find(&self, from: usize, to: usize) -> impl Iterator<Item = &Decoration> {
    self
      .decorations
      .iter()
      .filter(move |d| d.from <= to && d.to >= from)
  }

  /// Remap every decoration through an edit. Ranges that collapse and
  /// widgets whose position was deleted are dropped; insertions at a range
  /// boundary do not extend it.
  pub fn map(&self, mapping: &Mapping) -> DecorationSet {
    let mut mapped = Vec::with_capacity(self.decorations.len());
    for deco in &self.decorations {
      match deco.kind {
        DecorationKind::Widget => {
          let result = mapping.map_result(deco.from, Assoc::After);
          if !result.deleted {
            mapped.push(Decoration {
              from: result.pos,
              to:   result.pos,
              ..deco.clone()
            });
          }
        },
        DecorationKind::Inline | DecorationKind::Node => {
          let from = mapping.map_pos(deco.from, Assoc::After);
          let to = mapping.map_pos(deco.to, Assoc::Before);
          if from < to {
            mapped.push(Decoration {
              from,
              to,
              ..deco.clone()
            });
          }
        },
      }
    }
    DecorationSet::new(mapped)
  }
}

impl FromIterator<Decoration> for DecorationSet {
  fn from_iter<T: IntoIterator<Item = Decoration>>(iter: T) -> DecorationSet {
    DecorationSet::new(iter.into_iter().collect())
  }
}
