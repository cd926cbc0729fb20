//! Steps: atomic, invertible document edits, and the position maps they
//! induce.
//!
//! Every change to a document is expressed as a [`Step`]. A step either
//! applies cleanly, producing a new document, or fails without side effects;
//! there are no partial applications. Applying a step also yields a
//! [`StepMap`] describing how positions in the old document correspond to
//! positions in the new one, which is what keeps selections, decorations and
//! concurrent steps pointing at the right places.
//!
//! # Position mapping
//!
//! A [`StepMap`] is a sorted list of `(start, old_size, new_size)` ranges in
//! old-document coordinates. Positions outside every range keep their offset
//! from the nearest unedited boundary. Positions inside a replaced range
//! collapse to one of its edges, chosen by [`Assoc`]: `Before` sticks with
//! the content before the gap, `After` with the content after it.

use vellum_core::{
  node::{
    Fragment,
    Mark,
    Node,
  },
  position::PositionError,
  replace::ReplaceError,
  schema::{
    Attrs,
    InvalidContent,
    SchemaError,
  },
  slice::Slice,
};

use smallvec::SmallVec;

pub type Result<T> = std::result::Result<T, StepError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StepError {
  #[error("no node starts at position {pos}")]
  NoNodeAt { pos: usize },

  #[error("cannot set attributes on a text node (position {pos})")]
  AttrsOnText { pos: usize },

  #[error(transparent)]
  Replace(#[from] ReplaceError),

  #[error(transparent)]
  Position(#[from] PositionError),

  #[error(transparent)]
  Content(#[from] InvalidContent),

  #[error(transparent)]
  Schema(#[from] SchemaError),
}

/// Which side of an edit a mapped position should stick to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
  Before,
  After,
}

/// A mapped position, with a flag for positions that sat strictly inside
/// deleted content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapResult {
  pub pos:     usize,
  pub deleted: bool,
}

/// The position map induced by a single step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepMap {
  /// `(start, old_size, new_size)`, ascending and non-overlapping, in
  /// old-document coordinates.
  ranges: SmallVec<[(usize, usize, usize); 1]>,
}

impl StepMap {
  pub fn identity() -> StepMap {
    StepMap::default()
  }

  pub fn new(ranges: impl IntoIterator<Item = (usize, usize, usize)>) -> StepMap {
    StepMap {
      ranges: ranges.into_iter().collect(),
    }
  }

  pub fn is_identity(&self) -> bool {
    self.ranges.iter().all(|&(_, old, new)| old == new && old == 0)
  }

  pub fn map_pos(&self, pos: usize, assoc: Assoc) -> usize {
    self.map_result(pos, assoc).pos
  }

  pub fn map_result(&self, pos: usize, assoc: Assoc) -> MapResult {
    let mut diff: isize = 0;
    for &(start, old_size, new_size) in &self.ranges {
      if start > pos {
        break;
      }
      let end = start + old_size;
      if pos <= end {
        let side = if old_size == 0 {
          assoc
        } else if pos == start {
          Assoc::Before
        } else if pos == end {
          Assoc::After
        } else {
          assoc
        };
        let base = (start as isize + diff) as usize;
        let mapped = match side {
          Assoc::Before => base,
          Assoc::After => base + new_size,
        };
        return MapResult {
          pos:     mapped,
          deleted: pos > start && pos < end,
        };
      }
      diff += new_size as isize - old_size as isize;
    }
    MapResult {
      pos:     (pos as isize + diff) as usize,
      deleted: false,
    }
  }

  /// Whether `pos` sat strictly inside replaced content.
  pub fn deleted(&self, pos: usize) -> bool {
    self
      .ranges
      .iter()
      .any(|&(start, old, _)| pos > start && pos < start + old)
  }
}

/// A composed sequence of step maps.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
  maps: Vec<StepMap>,
}

impl Mapping {
  pub fn new() -> Mapping {
    Mapping::default()
  }

  pub fn push(&mut self, map: StepMap) {
    self.maps.push(map);
  }

  pub fn append(&mut self, other: &Mapping) {
    self.maps.extend(other.maps.iter().cloned());
  }

  pub fn maps(&self) -> &[StepMap] {
    &self.maps
  }

  pub fn is_empty(&self) -> bool {
    self.maps.is_empty()
  }

  pub fn map_pos(&self, pos: usize, assoc: Assoc) -> usize {
    self.map_result(pos, assoc).pos
  }

  pub fn map_result(&self, pos: usize, assoc: Assoc) -> MapResult {
    let mut result = MapResult {
      pos,
      deleted: false,
    };
    for map in &self.maps {
      let next = map.map_result(result.pos, assoc);
      result.pos = next.pos;
      result.deleted |= next.deleted;
    }
    result
  }
}

/// An atomic document edit.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
  /// Replace the range with a slice; inserts and deletes are the degenerate
  /// cases.
  Replace {
    from:  usize,
    to:    usize,
    slice: Slice,
  },
  /// Add a mark to every inline node in the range.
  AddMark {
    from: usize,
    to:   usize,
    mark: Mark,
  },
  /// Remove marks of the given type from every inline node in the range.
  RemoveMark {
    from: usize,
    to:   usize,
    mark: Mark,
  },
  /// Reset the attributes of the node starting at `pos`; `None` targets the
  /// document root.
  SetAttrs {
    pos:   Option<usize>,
    attrs: Attrs,
  },
}

impl Step {
  /// Apply to a document, producing the edited document.
  pub fn apply(&self, doc: &Node) -> Result<Node> {
    match self {
      Step::Replace { from, to, slice } => Ok(doc.replace(*from, *to, slice)?),
      Step::AddMark { from, to, mark } => {
        map_inline_range(doc, *from, *to, &|node, parent| {
          if parent.node_type().allows_mark(mark.type_name()) {
            node.with_marks(node.marks().add(mark))
          } else {
            node.clone()
          }
        })
      },
      Step::RemoveMark { from, to, mark } => {
        map_inline_range(doc, *from, *to, &|node, _parent| {
          node.with_marks(node.marks().remove(mark.type_name()))
        })
      },
      Step::SetAttrs { pos, attrs } => match pos {
        None => Ok(doc.with_attrs(Some(attrs))?),
        Some(pos) => {
          let target = node_at(doc, *pos)?;
          let rebuilt = target.with_attrs(Some(attrs))?;
          let slice = Slice::new(Fragment::from(rebuilt), 0, 0);
          Ok(doc.replace(*pos, *pos + target.size(), &slice)?)
        },
      },
    }
  }

  /// The step that undoes this one, given the document it was applied to.
  pub fn invert(&self, doc_before: &Node) -> Result<Step> {
    match self {
      Step::Replace { from, to, slice } => Ok(Step::Replace {
        from:  *from,
        to:    *from + slice.size(),
        slice: doc_before.slice(*from, *to)?,
      }),
      Step::AddMark { from, to, mark } => Ok(Step::RemoveMark {
        from: *from,
        to:   *to,
        mark: mark.clone(),
      }),
      Step::RemoveMark { from, to, mark } => Ok(Step::AddMark {
        from: *from,
        to:   *to,
        mark: mark.clone(),
      }),
      Step::SetAttrs { pos, attrs: _ } => {
        let target = match pos {
          None => doc_before.clone(),
          Some(pos) => node_at(doc_before, *pos)?,
        };
        Ok(Step::SetAttrs {
          pos:   *pos,
          attrs: target.attrs().clone(),
        })
      },
    }
  }

  /// The position map this step induces. Mark and attribute steps leave
  /// every position in place.
  pub fn step_map(&self) -> StepMap {
    match self {
      Step::Replace { from, to, slice } => StepMap::new([(*from, *to - *from, slice.size())]),
      _ => StepMap::identity(),
    }
  }

  /// Rebase this step over another step's map. `None` means the step's
  /// target was deleted outright.
  pub fn map(&self, map: &StepMap) -> Option<Step> {
    match self {
      Step::Replace { from, to, slice } => {
        let from = map.map_result(*from, Assoc::After);
        let to = map.map_result(*to, Assoc::Before);
        if from.deleted && to.deleted {
          return None;
        }
        Some(Step::Replace {
          from:  from.pos,
          to:    to.pos.max(from.pos),
          slice: slice.clone(),
        })
      },
      Step::AddMark { from, to, mark } => {
        map_mark_range(map, *from, *to).map(|(from, to)| Step::AddMark {
          from,
          to,
          mark: mark.clone(),
        })
      },
      Step::RemoveMark { from, to, mark } => {
        map_mark_range(map, *from, *to).map(|(from, to)| Step::RemoveMark {
          from,
          to,
          mark: mark.clone(),
        })
      },
      Step::SetAttrs { pos, attrs } => match pos {
        None => Some(self.clone()),
        Some(pos) => {
          let mapped = map.map_result(*pos, Assoc::After);
          if mapped.deleted {
            None
          } else {
            Some(Step::SetAttrs {
              pos:   Some(mapped.pos),
              attrs: attrs.clone(),
            })
          }
        },
      },
    }
  }
}

fn map_mark_range(map: &StepMap, from: usize, to: usize) -> Option<(usize, usize)> {
  let from = map.map_result(from, Assoc::After);
  let to = map.map_result(to, Assoc::Before);
  if (from.deleted && to.deleted) || from.pos >= to.pos {
    None
  } else {
    Some((from.pos, to.pos))
  }
}

/// The non-text node starting exactly at `pos`.
fn node_at(doc: &Node, pos: usize) -> Result<Node> {
  let rp = doc.resolve(pos)?;
  if rp.text_offset() > 0 {
    return Err(StepError::NoNodeAt { pos });
  }
  let node = rp.node_after().ok_or(StepError::NoNodeAt { pos })?;
  if node.is_text() {
    return Err(StepError::AttrsOnText { pos });
  }
  Ok(node)
}

/// Rebuild the inline nodes in a range through `f`, leaving everything else
/// shared.
fn map_inline_range(
  doc: &Node,
  from: usize,
  to: usize,
  f: &dyn Fn(&Node, &Node) -> Node,
) -> Result<Node> {
  let rf = doc.resolve(from)?;
  let rt = doc.resolve(to)?;
  let old = doc.slice(from, to)?;
  let parent = rf.node(rf.shared_depth(&rt)).clone();
  let mapped = map_inline_fragment(old.content(), &parent, f)?;
  let slice = Slice::new(mapped, old.open_start(), old.open_end());
  Ok(doc.replace(from, to, &slice)?)
}

fn map_inline_fragment(
  fragment: &Fragment,
  parent: &Node,
  f: &dyn Fn(&Node, &Node) -> Node,
) -> Result<Fragment> {
  let mut out = Vec::with_capacity(fragment.count());
  for child in fragment.iter() {
    let child = if child.is_inline() {
      f(child, parent)
    } else if child.is_leaf() {
      child.clone()
    } else {
      let content = map_inline_fragment(child.content(), child, f)?;
      child.with_content(content)?
    };
    out.push(child);
  }
  Ok(Fragment::from_nodes(out))
}

#[cfg(test)]
mod test {
  use serde_json::json;

  use crate::testutil::{
    doc,
    p,
    schema,
    text_slice,
  };

  use super::*;

  #[test]
  fn replace_step_applies_and_inverts() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);

    let step = Step::Replace {
      from:  4,
      to:    6,
      slice: text_slice(&schema, "p!"),
    };
    let edited = step.apply(&document).unwrap();
    assert_eq!(edited.text_content(), "help!");

    let inverse = step.invert(&document).unwrap();
    let restored = inverse.apply(&edited).unwrap();
    assert_eq!(restored, document);
  }

  #[test]
  fn add_and_remove_mark() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello world")]);
    let bold = schema.mark("bold", None).unwrap();

    let step = Step::AddMark {
      from: 1,
      to:   6,
      mark: bold.clone(),
    };
    let marked = step.apply(&document).unwrap();
    assert!(marked.range_has_mark(1, 6, "bold"));
    assert!(!marked.range_has_mark(6, 12, "bold"));
    // The paragraph now holds two runs.
    assert_eq!(marked.child(0).unwrap().child_count(), 2);

    let inverse = step.invert(&document).unwrap();
    let unmarked = inverse.apply(&marked).unwrap();
    assert_eq!(unmarked, document);
  }

  #[test]
  fn add_mark_respects_allowance() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);
    let bold = schema.mark("bold", None).unwrap();

    // Mark a range that only covers part of the paragraph; the rest stays
    // plain and the document stays valid.
    let step = Step::AddMark {
      from: 2,
      to:   4,
      mark: bold,
    };
    let marked = step.apply(&document).unwrap();
    assert_eq!(marked.child(0).unwrap().child_count(), 3);
    assert_eq!(marked.text_content(), "hello");
  }

  #[test]
  fn set_attrs_on_node_and_root() {
    let schema = schema();
    let heading = schema
      .node(
        "heading",
        None,
        vellum_core::node::Fragment::from(schema.text("Hi")),
      )
      .unwrap();
    let document = doc(&schema, vec![heading]);

    let step = Step::SetAttrs {
      pos:   Some(0),
      attrs: [("level".to_owned(), json!(3))].into_iter().collect(),
    };
    let edited = step.apply(&document).unwrap();
    assert_eq!(edited.child(0).unwrap().attr("level"), Some(&json!(3)));

    let inverse = step.invert(&document).unwrap();
    assert_eq!(inverse.apply(&edited).unwrap(), document);
  }

  #[test]
  fn set_attrs_rejects_text_and_gaps() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);

    let step = Step::SetAttrs {
      pos:   Some(1),
      attrs: Attrs::new(),
    };
    assert!(matches!(
      step.apply(&document),
      Err(StepError::AttrsOnText { pos: 1 })
    ));

    let step = Step::SetAttrs {
      pos:   Some(2),
      attrs: Attrs::new(),
    };
    assert!(matches!(
      step.apply(&document),
      Err(StepError::NoNodeAt { pos: 2 })
    ));
  }

  #[test]
  fn step_map_offsets_later_positions() {
    // Replace 2..4 with three positions of content.
    let map = StepMap::new([(2, 2, 3)]);
    assert_eq!(map.map_pos(0, Assoc::After), 0);
    assert_eq!(map.map_pos(2, Assoc::Before), 2);
    assert_eq!(map.map_pos(2, Assoc::After), 2);
    assert_eq!(map.map_pos(4, Assoc::After), 5);
    assert_eq!(map.map_pos(10, Assoc::After), 11);
    // Inside the replaced range: collapses to the chosen side.
    assert_eq!(map.map_pos(3, Assoc::Before), 2);
    assert_eq!(map.map_pos(3, Assoc::After), 5);
    assert!(map.deleted(3));
    assert!(!map.deleted(2));
    assert!(!map.deleted(4));
  }

  #[test]
  fn insertion_boundary_respects_assoc() {
    // Pure insertion of two positions at 5.
    let map = StepMap::new([(5, 0, 2)]);
    assert_eq!(map.map_pos(5, Assoc::Before), 5);
    assert_eq!(map.map_pos(5, Assoc::After), 7);
    assert_eq!(map.map_pos(6, Assoc::Before), 8);
  }

  #[test]
  fn mapping_composes() {
    let mut mapping = Mapping::new();
    mapping.push(StepMap::new([(0, 0, 3)])); // insert 3 at 0
    mapping.push(StepMap::new([(6, 2, 0)])); // delete 6..8
    assert_eq!(mapping.map_pos(4, Assoc::After), 6);
    assert_eq!(mapping.map_pos(5, Assoc::After), 6);
    assert!(mapping.map_result(4, Assoc::After).deleted);
  }

  #[test]
  fn steps_rebase_over_maps() {
    let schema = schema();
    let insert = StepMap::new([(0, 0, 5)]);
    let step = Step::Replace {
      from:  2,
      to:    4,
      slice: text_slice(&schema, "x"),
    };
    match step.map(&insert) {
      Some(Step::Replace { from, to, .. }) => {
        assert_eq!((from, to), (7, 9));
      },
      other => panic!("unexpected mapping result: {other:?}"),
    }

    // A step whose whole target was deleted disappears.
    let delete = StepMap::new([(0, 6, 0)]);
    assert!(step.map(&delete).is_none());
  }

  #[test]
  fn mapping_never_reorders_positions() {
    fn prop(spans: Vec<(u8, u8, u8)>, a: u8, b: u8) -> bool {
      // Spans are (gap, old_size, new_size) deltas, so the built ranges are
      // always ascending and disjoint in old coordinates.
      let mut ranges = Vec::new();
      let mut pos = 0usize;
      for (gap, old, new) in spans.into_iter().take(8) {
        pos += gap as usize;
        ranges.push((pos, old as usize, new as usize));
        pos += old as usize;
      }
      let map = StepMap::new(ranges);
      let (a, b) = (a as usize % (pos + 2), b as usize % (pos + 2));
      let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
      map.map_pos(lo, Assoc::Before) <= map.map_pos(hi, Assoc::Before)
        && map.map_pos(lo, Assoc::After) <= map.map_pos(hi, Assoc::After)
    }
    quickcheck::QuickCheck::new()
      .tests(200)
      .quickcheck(prop as fn(Vec<(u8, u8, u8)>, u8, u8) -> bool);
  }
}
