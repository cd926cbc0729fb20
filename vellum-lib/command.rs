//! Commands: composable edit intents.
//!
//! A command inspects the state, extends a transaction, and says whether it
//! applied. Commands never dispatch; the caller owns the transaction. A
//! [`Chain`] runs several commands against one shared transaction with an
//! all-or-nothing contract: if any link declines, the whole transaction is
//! discarded and nothing reaches the editor.

use unicode_segmentation::UnicodeSegmentation;
use vellum_core::{
  node::{
    Fragment,
    Node,
  },
  schema::Attrs,
  slice::Slice,
};

use crate::{
  selection::Selection,
  state::EditorState,
  transaction::Transaction,
};

/// The command seam: anything callable as `(state, tr) -> bool`.
pub trait Command: Send + Sync {
  fn run(&self, state: &EditorState, tr: &mut Transaction) -> bool;
}

impl<F> Command for F
where
  F: Fn(&EditorState, &mut Transaction) -> bool + Send + Sync,
{
  fn run(&self, state: &EditorState, tr: &mut Transaction) -> bool {
    self(state, tr)
  }
}

/// A sequence of commands sharing one transaction.
#[derive(Default)]
pub struct Chain {
  commands: Vec<Box<dyn Command>>,
}

pub fn chain() -> Chain {
  Chain::default()
}

impl Chain {
  pub fn then(mut self, command: impl Command + 'static) -> Chain {
    self.commands.push(Box::new(command));
    self
  }

  /// Run every command against a fresh transaction. `None` means some link
  /// declined; the partial transaction is dropped, not dispatched.
  pub fn build(&self, state: &EditorState) -> Option<Transaction> {
    let mut tr = state.tr();
    for command in &self.commands {
      if !command.run(state, &mut tr) {
        return None;
      }
    }
    Some(tr)
  }
}

/// The selection a command should act on: the one the transaction set, or
/// the state's selection carried through the steps so far.
pub fn current_selection(state: &EditorState, tr: &Transaction) -> Selection {
  tr.selection()
    .cloned()
    .unwrap_or_else(|| state.selection().map(tr.mapping(), tr.doc()))
}

fn set_caret(tr: &mut Transaction, pos: usize) -> bool {
  tr.set_selection(Selection::Text {
    anchor: pos,
    head:   pos,
  })
  .is_ok()
}

/// Replace the selection with text; the caret ends up after it.
pub fn insert_text(text: impl Into<String>) -> impl Command {
  let text = text.into();
  move |state: &EditorState, tr: &mut Transaction| {
    let sel = current_selection(state, tr);
    let from = sel.from();
    if !sel.is_empty() && tr.delete_range(from, sel.to()).is_err() {
      return false;
    }
    if tr.insert_text(from, &text).is_err() {
      return false;
    }
    // The insertion may have slid to the nearest inline position.
    let caret = match tr.steps().last() {
      Some(crate::step::Step::Replace { from, slice, .. }) => from + slice.size(),
      _ => from + text.chars().count(),
    };
    set_caret(tr, caret)
  }
}

/// Delete the selected range; declines on a caret.
pub fn delete_selection(state: &EditorState, tr: &mut Transaction) -> bool {
  let sel = current_selection(state, tr);
  if sel.is_empty() {
    return false;
  }
  let from = sel.from();
  tr.delete_range(from, sel.to()).is_ok() && set_caret(tr, from)
}

/// Backspace: delete the selection, else the grapheme before the caret,
/// else join with the previous block.
pub fn delete_backward(state: &EditorState, tr: &mut Transaction) -> bool {
  let sel = current_selection(state, tr);
  if !sel.is_empty() {
    return delete_selection(state, tr);
  }
  let pos = sel.head();
  let rp = match tr.doc().resolve(pos) {
    Ok(rp) => rp,
    Err(_) => return false,
  };
  if rp.parent_offset() > 0 {
    let len = match rp.node_before() {
      Some(node) if node.is_text() => node
        .text()
        .map(|t| t.graphemes(true).next_back().map_or(1, |g| g.chars().count()))
        .unwrap_or(1),
      _ => 1,
    };
    return tr.delete_range(pos - len, pos).is_ok() && set_caret(tr, pos - len);
  }
  join_backward(state, tr)
}

/// Join the block around the caret with the one before it.
pub fn join_backward(state: &EditorState, tr: &mut Transaction) -> bool {
  let sel = current_selection(state, tr);
  let pos = sel.head();
  let rp = match tr.doc().resolve(pos) {
    Ok(rp) => rp,
    Err(_) => return false,
  };
  let Some(boundary) = rp.before(rp.depth()) else {
    return false;
  };
  if boundary == 0 {
    return false;
  }
  tr.replace(boundary - 1, boundary + 1, Slice::empty()).is_ok()
    && set_caret(tr, boundary - 1)
}

/// Split the block at the caret, carrying the block type over.
pub fn split_block(state: &EditorState, tr: &mut Transaction) -> bool {
  let sel = current_selection(state, tr);
  let from = sel.from();
  if !sel.is_empty() && tr.delete_range(from, sel.to()).is_err() {
    return false;
  }
  let rp = match tr.doc().resolve(from) {
    Ok(rp) => rp,
    Err(_) => return false,
  };
  if !rp.parent().inline_content() {
    return false;
  }
  let Ok(empty) = rp.parent().with_content(Fragment::empty()) else {
    return false;
  };
  let slice = Slice::new(Fragment::from_nodes(vec![empty.clone(), empty]), 1, 1);
  tr.replace(from, from, slice).is_ok() && set_caret(tr, from + 2)
}

/// Add a mark across the selection.
pub fn set_mark(name: impl Into<String>, attrs: Option<Attrs>) -> impl Command {
  let name = name.into();
  move |state: &EditorState, tr: &mut Transaction| {
    let sel = current_selection(state, tr);
    if sel.is_empty() {
      return false;
    }
    let Ok(mark) = tr.schema().mark(&name, attrs.as_ref()) else {
      return false;
    };
    tr.add_mark(sel.from(), sel.to(), mark).is_ok()
  }
}

/// Remove marks of a type across the selection.
pub fn unset_mark(name: impl Into<String>) -> impl Command {
  let name = name.into();
  move |state: &EditorState, tr: &mut Transaction| {
    let sel = current_selection(state, tr);
    if sel.is_empty() {
      return false;
    }
    let Ok(mark) = tr.schema().mark(&name, None) else {
      return false;
    };
    tr.remove_mark(sel.from(), sel.to(), mark).is_ok()
  }
}

/// Add the mark unless any inline node in the selection already carries it.
pub fn toggle_mark(name: impl Into<String>) -> impl Command {
  let name = name.into();
  move |state: &EditorState, tr: &mut Transaction| {
    let sel = current_selection(state, tr);
    if sel.is_empty() {
      return false;
    }
    let Ok(mark) = tr.schema().mark(&name, None) else {
      return false;
    };
    let (from, to) = (sel.from(), sel.to());
    if tr.doc().range_has_mark(from, to, &name) {
      tr.remove_mark(from, to, mark).is_ok()
    } else {
      tr.add_mark(from, to, mark).is_ok()
    }
  }
}

/// Textblocks intersecting the selection, as `(position before, node)`.
fn selected_textblocks(doc: &Node, from: usize, to: usize) -> Vec<(usize, Node)> {
  let mut blocks = Vec::new();
  doc.nodes_between(from, to, &mut |node, pos| {
    if node.inline_content() {
      blocks.push((pos, node.clone()));
      false
    } else {
      !node.is_leaf()
    }
  });
  blocks
}

/// Change every textblock touching the selection to the given type.
pub fn set_block_type(name: impl Into<String>, attrs: Option<Attrs>) -> impl Command {
  let name = name.into();
  move |state: &EditorState, tr: &mut Transaction| {
    let sel = current_selection(state, tr);
    let blocks = selected_textblocks(tr.doc(), sel.from(), sel.to());
    if blocks.is_empty() {
      return false;
    }
    for (pos, node) in blocks {
      if node.type_name() == name {
        continue;
      }
      let Ok(replacement) = tr
        .schema()
        .node(&name, attrs.as_ref(), node.content().clone())
      else {
        return false;
      };
      // Same content, so sizes match and later positions are unaffected.
      let slice = Slice::new(Fragment::from(replacement), 0, 0);
      if tr.replace(pos, pos + node.size(), slice).is_err() {
        return false;
      }
    }
    true
  }
}

/// Set the block type, or revert to paragraphs when every selected block
/// already has it.
pub fn toggle_node(name: impl Into<String>, attrs: Option<Attrs>) -> impl Command {
  let name = name.into();
  move |state: &EditorState, tr: &mut Transaction| {
    let sel = current_selection(state, tr);
    let blocks = selected_textblocks(tr.doc(), sel.from(), sel.to());
    if blocks.is_empty() {
      return false;
    }
    let all_match = blocks.iter().all(|(_, node)| node.type_name() == name);
    let target: Box<dyn Command> = if all_match {
      Box::new(set_block_type("paragraph", None))
    } else {
      Box::new(set_block_type(name.clone(), attrs.clone()))
    };
    target.run(state, tr)
  }
}

/// Select the whole document.
pub fn select_all(_state: &EditorState, tr: &mut Transaction) -> bool {
  let end = tr.doc().content_size();
  tr.set_selection(Selection::Text {
    anchor: 0,
    head:   end,
  })
  .is_ok()
}

#[cfg(test)]
mod test {
  use crate::testutil::{
    doc,
    p,
    schema,
    state_with,
  };

  use super::*;

  #[test]
  fn chain_is_all_or_nothing() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 1, head: 1 });

    // delete_selection declines on a caret, so insert_text never runs.
    let tr = chain()
      .then(delete_selection)
      .then(insert_text("x"))
      .build(&state);
    assert!(tr.is_none());

    // With a real selection both links apply.
    let state = state_with(
      &schema,
      doc(&schema, vec![p(&schema, "hello")]),
      Selection::Text { anchor: 1, head: 6 },
    );
    let tr = chain()
      .then(delete_selection)
      .then(insert_text("x"))
      .build(&state)
      .unwrap();
    assert_eq!(tr.doc().text_content(), "x");
  }

  #[test]
  fn insert_text_replaces_selection_and_moves_caret() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 2, head: 4 });

    let tr = chain().then(insert_text("-")).build(&state).unwrap();
    assert_eq!(tr.doc().text_content(), "h-lo");
    assert_eq!(tr.selection(), Some(&Selection::Text { anchor: 3, head: 3 }));
  }

  #[test]
  fn delete_backward_eats_a_grapheme() {
    let schema = schema();
    // é as e + combining accent is one grapheme, two chars.
    let document = doc(&schema, vec![p(&schema, "ae\u{301}")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 4, head: 4 });

    let tr = chain().then(delete_backward).build(&state).unwrap();
    assert_eq!(tr.doc().text_content(), "a");
    assert_eq!(tr.selection(), Some(&Selection::Text { anchor: 2, head: 2 }));
  }

  #[test]
  fn delete_backward_joins_blocks_at_block_start() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "ab"), p(&schema, "cd")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 5, head: 5 });

    let tr = chain().then(delete_backward).build(&state).unwrap();
    assert_eq!(tr.doc().child_count(), 1);
    assert_eq!(tr.doc().text_content(), "abcd");
    assert_eq!(tr.selection(), Some(&Selection::Text { anchor: 3, head: 3 }));
  }

  #[test]
  fn delete_backward_stops_at_document_start() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "ab")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 1, head: 1 });

    assert!(chain().then(delete_backward).build(&state).is_none());
  }

  #[test]
  fn split_block_carries_the_type() {
    let schema = schema();
    let heading = schema
      .node("heading", None, Fragment::from(schema.text("Title")))
      .unwrap();
    let document = doc(&schema, vec![heading]);
    let state = state_with(&schema, document, Selection::Text { anchor: 3, head: 3 });

    let tr = chain().then(split_block).build(&state).unwrap();
    assert_eq!(tr.doc().child_count(), 2);
    assert_eq!(tr.doc().child(0).unwrap().type_name(), "heading");
    assert_eq!(tr.doc().child(1).unwrap().type_name(), "heading");
    assert_eq!(tr.doc().child(1).unwrap().text_content(), "tle");
    assert_eq!(tr.selection(), Some(&Selection::Text { anchor: 5, head: 5 }));
  }

  #[test]
  fn toggle_mark_round_trips() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 1, head: 6 });

    let tr = chain().then(toggle_mark("bold")).build(&state).unwrap();
    assert!(tr.doc().range_has_mark(1, 6, "bold"));

    let state = state_with(
      &schema,
      tr.doc().clone(),
      Selection::Text { anchor: 1, head: 6 },
    );
    let tr = chain().then(toggle_mark("bold")).build(&state).unwrap();
    assert!(!tr.doc().range_has_mark(1, 6, "bold"));
  }

  #[test]
  fn toggle_node_switches_block_types() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "one"), p(&schema, "two")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 1, head: 9 });

    let tr = chain()
      .then(toggle_node("heading", None))
      .build(&state)
      .unwrap();
    assert_eq!(tr.doc().child(0).unwrap().type_name(), "heading");
    assert_eq!(tr.doc().child(1).unwrap().type_name(), "heading");

    let state = state_with(
      &schema,
      tr.doc().clone(),
      Selection::Text { anchor: 1, head: 9 },
    );
    let tr = chain()
      .then(toggle_node("heading", None))
      .build(&state)
      .unwrap();
    assert_eq!(tr.doc().child(0).unwrap().type_name(), "paragraph");
    assert_eq!(tr.doc().child(1).unwrap().type_name(), "paragraph");
  }

  #[test]
  fn select_all_covers_the_document() {
    let schema = schema();
    let document = doc(&schema, vec![p(&schema, "hello")]);
    let state = state_with(&schema, document, Selection::Text { anchor: 1, head: 1 });

    let tr = chain().then(select_all).build(&state).unwrap();
    assert_eq!(tr.selection(), Some(&Selection::Text { anchor: 0, head: 7 }));
  }
}
