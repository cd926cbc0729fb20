//! Key bindings.
//!
//! Keys are plain descriptor strings ("Enter", "Backspace", "Mod-b"); the
//! view layer is responsible for normalizing raw input into them. Bindings
//! are resolved newest-first, and a binding that declines a key falls
//! through to the next older one for the same key.

use crate::command::Command;

#[derive(Default)]
pub struct Keymap {
  bindings: Vec<(String, Box<dyn Command>)>,
}

impl Keymap {
  pub fn new() -> Keymap {
    Keymap::default()
  }

  pub fn bind(&mut self, key: impl Into<String>, command: impl Command + 'static) {
    self.bindings.push((key.into(), Box::new(command)));
  }

  /// Builder-style [`Keymap::bind`].
  pub fn with(mut self, key: impl Into<String>, command: impl Command + 'static) -> Keymap {
    self.bind(key, command);
    self
  }

  /// All bindings for `key`, newest first. Callers try each in turn, so a
  /// newer binding only shadows an older one when it actually handles the
  /// key.
  pub fn resolve<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a dyn Command> {
    self
      .bindings
      .iter()
      .rev()
      .filter(move |(bound, _)| bound == key)
      .map(|(_, command)| command.as_ref())
  }

  pub fn len(&self) -> usize {
    self.bindings.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bindings.is_empty()
  }

  /// Absorb another keymap's bindings; the other map's bindings are newer
  /// and therefore win on conflict.
  pub fn merge(&mut self, other: Keymap) {
    self.bindings.extend(other.bindings);
  }
}

impl std::fmt::Debug for Keymap {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list()
      .entries(self.bindings.iter().map(|(key, _)| key))
      .finish()
  }
}

#[cfg(test)]
mod test {
  use crate::{
    command::{
      delete_selection,
      insert_text,
    },
    testutil::{
      doc,
      p,
      schema,
      state_with,
    },
    selection::Selection,
  };

  use super::*;

  #[test]
  fn newest_binding_wins() {
    let mut keymap = Keymap::new();
    keymap.bind("Mod-x", insert_text("first"));
    keymap.bind("Mod-x", insert_text("second"));

    let schema = schema();
    let state = state_with(
      &schema,
      doc(&schema, vec![p(&schema, "")]),
      Selection::Text { anchor: 1, head: 1 },
    );
    let command = keymap.resolve("Mod-x").next().unwrap();
    let mut tr = state.tr();
    assert!(command.run(&state, &mut tr));
    assert_eq!(tr.doc().text_content(), "second");
  }

  #[test]
  fn declined_binding_falls_through_to_an_older_one() {
    let mut keymap = Keymap::new();
    keymap.bind("Mod-x", insert_text("older"));
    keymap.bind("Mod-x", delete_selection);

    let schema = schema();
    let state = state_with(
      &schema,
      doc(&schema, vec![p(&schema, "hi")]),
      Selection::Text { anchor: 1, head: 1 },
    );

    // delete_selection declines on a caret; the older insert must get a
    // turn.
    let mut applied = None;
    for command in keymap.resolve("Mod-x") {
      let mut tr = state.tr();
      if command.run(&state, &mut tr) {
        applied = Some(tr);
        break;
      }
    }
    assert_eq!(applied.unwrap().doc().text_content(), "olderhi");
  }

  #[test]
  fn unbound_keys_resolve_to_nothing() {
    let keymap = Keymap::new().with("Enter", insert_text("x"));
    assert!(keymap.resolve("Escape").next().is_none());
  }
}
