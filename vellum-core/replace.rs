//! Replacing a range of the document with a slice.
//!
//! This is the single primitive every document edit reduces to. The range's
//! endpoints and the slice's open sides are matched up depth by depth: nodes
//! cut open on the left of the range join onto the slice's open left side,
//! and symmetrically on the right. Every parent rebuilt along the way is
//! revalidated against its content grammar, so an edit can never produce a
//! document the schema rejects.
//!
//! The work and the allocations are proportional to the depth of the
//! endpoints and the size of the slice; untouched subtrees are shared with
//! the input document.

use crate::{
  node::{
    Fragment,
    Node,
  },
  position::{
    PositionError,
    ResolvedPos,
  },
  schema::InvalidContent,
  slice::Slice,
};

pub type Result<T> = std::result::Result<T, ReplaceError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ReplaceError {
  #[error("replace range is inverted ({from} > {to})")]
  InvertedRange { from: usize, to: usize },

  #[error("slice is open {open} deep but the boundary sits at depth {depth}")]
  OpenTooDeep { open: usize, depth: usize },

  #[error(
    "inconsistent open depths: left {from_depth}-{open_start}, right {to_depth}-{open_end}"
  )]
  InconsistentOpenDepths {
    from_depth: usize,
    open_start: usize,
    to_depth:   usize,
    open_end:   usize,
  },

  #[error("cannot join {sub} onto {main}")]
  CannotJoin { sub: String, main: String },

  #[error(transparent)]
  Content(#[from] InvalidContent),

  #[error(transparent)]
  Position(#[from] PositionError),
}

impl Node {
  /// Replace the range `from..to` with `slice`, producing a new document.
  pub fn replace(&self, from: usize, to: usize, slice: &Slice) -> Result<Node> {
    if from > to {
      return Err(ReplaceError::InvertedRange { from, to });
    }
    let rf = self.resolve(from)?;
    let rt = self.resolve(to)?;
    if slice.open_start() > rf.depth() {
      return Err(ReplaceError::OpenTooDeep {
        open:  slice.open_start(),
        depth: rf.depth(),
      });
    }
    if slice.open_end() > rt.depth()
      || rf.depth() - slice.open_start() != rt.depth() - slice.open_end()
    {
      return Err(ReplaceError::InconsistentOpenDepths {
        from_depth: rf.depth(),
        open_start: slice.open_start(),
        to_depth:   rt.depth(),
        open_end:   slice.open_end(),
      });
    }
    replace_outer(&rf, &rt, slice, 0)
  }
}

fn replace_outer(rf: &ResolvedPos, rt: &ResolvedPos, slice: &Slice, depth: usize) -> Result<Node> {
  let index = rf.index(depth);
  let node = rf.node(depth);
  if index == rt.index(depth) && depth < rf.depth() - slice.open_start() {
    // Both endpoints sit inside the same child; descend and splice the
    // rebuilt child back in, leaving the siblings shared.
    let inner = replace_outer(rf, rt, slice, depth + 1)?;
    Ok(node.with_content_raw(node.content().replace_child(index, inner)))
  } else if slice.content().size() == 0 {
    close(node, replace_two_way(rf, rt, depth)?)
  } else if slice.open_start() == 0
    && slice.open_end() == 0
    && rf.depth() == depth
    && rt.depth() == depth
  {
    // Closed slice, flat range: splice directly into the parent.
    let parent = rf.parent();
    let content = parent.content();
    let merged = content
      .cut(0, rf.parent_offset())
      .append(slice.content())
      .append(&content.cut(rt.parent_offset(), content.size()));
    close(parent, merged)
  } else {
    let (start, end) = prepare_slice_for_replace(slice, rf)?;
    close(node, replace_three_way(rf, &start, &end, rt, depth)?)
  }
}

/// Rebuild a node with new content, validating it against the node's
/// grammar.
fn close(node: &Node, content: Fragment) -> Result<Node> {
  Ok(node.with_content(content)?)
}

fn check_join(main: &Node, sub: &Node) -> Result<()> {
  if main.type_name() != sub.type_name() {
    return Err(ReplaceError::CannotJoin {
      sub:  sub.type_name().to_owned(),
      main: main.type_name().to_owned(),
    });
  }
  Ok(())
}

/// The node `before` is open into at `depth`, provided `after`'s node there
/// can join onto it.
fn joinable(before: &ResolvedPos, after: &ResolvedPos, depth: usize) -> Result<Node> {
  let node = before.node(depth);
  check_join(node, after.node(depth))?;
  Ok(node.clone())
}

/// Append the children of the node at `depth` between two boundaries:
/// everything after `start` (or from the beginning) up to `end` (or the
/// end), with partially covered text runs cut to size.
fn add_range(
  start: Option<&ResolvedPos>,
  end: Option<&ResolvedPos>,
  depth: usize,
  target: &mut Vec<Node>,
) {
  let node = match end.or(start) {
    Some(rp) => rp.node(depth),
    None => return,
  };
  let mut start_index = 0;
  let end_index = match end {
    Some(e) => e.index(depth),
    None => node.child_count(),
  };
  if let Some(s) = start {
    start_index = s.index(depth);
    if s.depth() > depth {
      start_index += 1;
    } else if s.text_offset() > 0 {
      if let Some(after) = s.node_after() {
        target.push(after);
      }
      start_index += 1;
    }
  }
  for i in start_index..end_index {
    if let Some(child) = node.child(i) {
      target.push(child.clone());
    }
  }
  if let Some(e) = end {
    if e.depth() == depth && e.text_offset() > 0 {
      if let Some(before) = e.node_before() {
        target.push(before);
      }
    }
  }
}

/// Delete between two positions: stitch the content before `rf` to the
/// content after `rt`, joining the open nodes level by level.
fn replace_two_way(rf: &ResolvedPos, rt: &ResolvedPos, depth: usize) -> Result<Fragment> {
  let mut content = Vec::new();
  add_range(None, Some(rf), depth, &mut content);
  if rf.depth() > depth {
    let node = joinable(rf, rt, depth + 1)?;
    let inner = replace_two_way(rf, rt, depth + 1)?;
    content.push(close(&node, inner)?);
  }
  add_range(Some(rt), None, depth, &mut content);
  Ok(Fragment::from_nodes(content))
}

/// The general case: content before `rf`, then the slice between `rs` and
/// `re`, then content after `rt`, with open nodes on each side joined.
fn replace_three_way(
  rf: &ResolvedPos,
  rs: &ResolvedPos,
  re: &ResolvedPos,
  rt: &ResolvedPos,
  depth: usize,
) -> Result<Fragment> {
  let open_start = if rf.depth() > depth {
    Some(joinable(rf, rs, depth + 1)?)
  } else {
    None
  };
  let open_end = if rt.depth() > depth {
    Some(joinable(re, rt, depth + 1)?)
  } else {
    None
  };

  let mut content = Vec::new();
  add_range(None, Some(rf), depth, &mut content);
  match (open_start, open_end) {
    (Some(os), Some(oe)) if rs.index(depth) == re.index(depth) => {
      check_join(&os, &oe)?;
      let inner = replace_three_way(rf, rs, re, rt, depth + 1)?;
      content.push(close(&os, inner)?);
    },
    (os, oe) => {
      if let Some(os) = os {
        let inner = replace_two_way(rf, rs, depth + 1)?;
        content.push(close(&os, inner)?);
      }
      add_range(Some(rs), Some(re), depth, &mut content);
      if let Some(oe) = oe {
        let inner = replace_two_way(re, rt, depth + 1)?;
        content.push(close(&oe, inner)?);
      }
    },
  }
  add_range(Some(rt), None, depth, &mut content);
  Ok(Fragment::from_nodes(content))
}

/// Wrap the slice's content in copies of the insertion point's ancestors so
/// its open boundaries can be resolved like document positions.
fn prepare_slice_for_replace(
  slice: &Slice,
  along: &ResolvedPos,
) -> Result<(ResolvedPos, ResolvedPos)> {
  let extra = along.depth() - slice.open_start();
  let parent = along.node(extra);
  let mut node = parent.with_content_raw(slice.content().clone());
  for depth in (0..extra).rev() {
    node = along.node(depth).with_content_raw(Fragment::from(node));
  }
  let start = node.resolve(slice.open_start() + extra)?;
  let end = node.resolve(node.content_size() - slice.open_end() - extra)?;
  Ok((start, end))
}
