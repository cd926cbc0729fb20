//! Suggestion tracking: a plugin-backed state machine for trigger-based
//! popups (mentions, slash menus).
//!
//! The machine is `Idle` until the configured trigger text sits immediately
//! before the caret, outside excluded marks. While `Tracking` it follows the
//! range across every transaction via position mapping and recomputes the
//! query as the text between the trigger and the caret. It returns to `Idle`
//! when the caret leaves the range, a stop character is typed, or a commit
//! or cancel transaction arrives.
//!
//! Commit and cancel are ordinary transactions carrying metadata flags, so
//! external collaborators (the popup UI) drive the machine without any back
//! channel into the editor.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{
  Value,
  json,
};
use tracing::debug;
use vellum_core::{
  node::{
    Fragment,
    Node,
  },
  schema::Schema,
  slice::Slice,
};

use crate::{
  decoration::{
    Decoration,
    DecorationSet,
  },
  history::META_NEW_GROUP,
  plugin::{
    Plugin,
    PluginCtx,
    PluginState,
  },
  selection::Selection,
  state::{
    EditorState,
    Event,
  },
  step::Assoc,
  transaction::Transaction,
};

/// Metadata key carrying the committed value; set by
/// [`SuggestionPlugin::commit`].
pub const META_COMMIT: &str = "suggestion.commit";

/// Metadata key that cancels tracking; set by [`SuggestionPlugin::cancel`].
pub const META_CANCEL: &str = "suggestion.cancel";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
  /// Text that starts tracking when typed before the caret.
  pub trigger:        String,
  /// Characters that end tracking when they enter the query.
  pub stop_chars:     Vec<char>,
  /// Mark type names inside which the trigger is inert.
  pub excluded_marks: Vec<String>,
}

impl Default for SuggestionConfig {
  fn default() -> Self {
    SuggestionConfig {
      trigger:        "/".into(),
      stop_chars:     vec![' ', '\n'],
      excluded_marks: vec!["code".into()],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionState {
  Idle,
  Tracking {
    /// Position of the trigger text; start of the tracked range.
    from:  usize,
    /// End of the tracked range; always the caret while tracking.
    to:    usize,
    query: String,
  },
}

impl SuggestionState {
  pub fn is_tracking(&self) -> bool {
    matches!(self, SuggestionState::Tracking { .. })
  }

  pub fn query(&self) -> Option<&str> {
    match self {
      SuggestionState::Tracking { query, .. } => Some(query),
      SuggestionState::Idle => None,
    }
  }
}

pub struct SuggestionPlugin {
  config: SuggestionConfig,
}

impl SuggestionPlugin {
  pub fn new(config: SuggestionConfig) -> SuggestionPlugin {
    SuggestionPlugin { config }
  }

  /// The machine's state inside `state`, `Idle` when absent.
  pub fn state_of<'a>(&self, state: &'a EditorState) -> &'a SuggestionState {
    state
      .plugin_state(self.id())
      .and_then(|s| s.downcast_ref())
      .unwrap_or(&SuggestionState::Idle)
  }

  /// Build the commit transaction: one step replacing the whole tracked
  /// range (trigger included) with `value`, caret after the insertion.
  /// `None` when the machine is idle.
  pub fn commit(&self, state: &EditorState, value: &str) -> Option<Transaction> {
    let &SuggestionState::Tracking { from, to, .. } = self.state_of(state) else {
      return None;
    };
    let mut tr = state.tr();
    let slice = if value.is_empty() {
      Slice::empty()
    } else {
      Slice::new(Fragment::from(state.schema().text(value)), 0, 0)
    };
    tr.replace(from, to, slice).ok()?;
    let caret = from + value.chars().count();
    tr.set_selection(Selection::Text {
      anchor: caret,
      head:   caret,
    })
    .ok()?;
    tr.set_meta(META_COMMIT, json!(value));
    // A commit is its own undo unit, never merged into the typing burst.
    tr.set_meta(META_NEW_GROUP, json!(true));
    Some(tr)
  }

  /// Build a cancel transaction: no steps, just the cancel flag.
  pub fn cancel(&self, state: &EditorState) -> Transaction {
    let mut tr = state.tr();
    tr.set_meta(META_CANCEL, json!(true));
    tr
  }

  /// Trigger detection: the trigger text sits immediately before `pos`
  /// inside a textblock, and the position carries no excluded mark.
  fn trigger_at(&self, doc: &Node, pos: usize) -> Option<usize> {
    let trigger_len = self.config.trigger.chars().count();
    let rp = doc.resolve(pos).ok()?;
    if !rp.parent().inline_content() || rp.parent_offset() < trigger_len {
      return None;
    }
    let marks = rp.marks();
    if self.config.excluded_marks.iter().any(|m| marks.contains_type(m)) {
      return None;
    }
    let before = doc.text_between(pos - trigger_len, pos);
    (before == self.config.trigger).then(|| pos - trigger_len)
  }

  fn next_state(&self, ctx: &PluginCtx) -> SuggestionState {
    if ctx.transaction.get_meta(META_COMMIT).is_some()
      || ctx.transaction.get_meta(META_CANCEL).is_some()
    {
      return SuggestionState::Idle;
    }
    let Selection::Text { head, .. } = *ctx.selection else {
      return SuggestionState::Idle;
    };
    let trigger_len = self.config.trigger.chars().count();

    if let Some(&SuggestionState::Tracking { from, .. }) = ctx.prev::<SuggestionState>() {
      // Bias forward so an insertion at the range start pushes the range
      // along with the trigger text instead of leaving it behind.
      let from = ctx.transaction.mapping().map_pos(from, Assoc::After);
      let query_start = from + trigger_len;
      if head < query_start || head > ctx.doc.content_size() {
        return SuggestionState::Idle;
      }
      // The trigger must still sit at the mapped start; an edit that
      // destroyed or detached it ends tracking.
      if ctx.doc.text_between(from, query_start) != self.config.trigger {
        return SuggestionState::Idle;
      }
      // The caret may only move within the current textblock past the
      // trigger; crossing a block boundary ends tracking.
      let query = ctx.doc.text_between(query_start, head);
      let query_chars = query.chars().count();
      if query_chars != head - query_start {
        return SuggestionState::Idle;
      }
      if query.chars().any(|c| self.config.stop_chars.contains(&c)) {
        return SuggestionState::Idle;
      }
      return SuggestionState::Tracking {
        from,
        to: head,
        query,
      };
    }

    if ctx.transaction.doc_changed() {
      if let Some(from) = self.trigger_at(ctx.doc, head) {
        return SuggestionState::Tracking {
          from,
          to: head,
          query: String::new(),
        };
      }
    }
    SuggestionState::Idle
  }
}

impl Plugin for SuggestionPlugin {
  fn id(&self) -> &str {
    "suggestion"
  }

  fn init(&self, _schema: &Schema, _doc: &Node) -> Option<PluginState> {
    Some(Arc::new(SuggestionState::Idle))
  }

  fn apply(&self, ctx: &PluginCtx) -> Option<PluginState> {
    let prev = ctx
      .prev::<SuggestionState>()
      .cloned()
      .unwrap_or(SuggestionState::Idle);
    let next = self.next_state(ctx);
    if next != prev {
      debug!(?prev, ?next, "suggestion transition");
    }
    Some(Arc::new(next))
  }

  fn decorations(
    &self,
    state: Option<&PluginState>,
    _doc: &Node,
    _selection: &Selection,
  ) -> DecorationSet {
    match state.and_then(|s| s.downcast_ref()) {
      Some(&SuggestionState::Tracking { from, to, .. }) if from < to => {
        DecorationSet::new(vec![Decoration::inline(
          from,
          to,
          json!({ "class": "suggestion" }),
        )])
      },
      _ => DecorationSet::empty(),
    }
  }

  fn events(
    &self,
    tr: &Transaction,
    old: &EditorState,
    new: &EditorState,
  ) -> Vec<Event<'static>> {
    let before = self.state_of(old);
    let after = self.state_of(new);
    match (before, after) {
      (SuggestionState::Idle, SuggestionState::Tracking { from, query, .. }) => {
        vec![Event::SuggestionTriggered {
          trigger: self.config.trigger.clone(),
          query:   query.clone(),
          pos:     *from,
        }]
      },
      (
        SuggestionState::Tracking { query: old_query, .. },
        SuggestionState::Tracking { query, .. },
      ) if old_query != query => vec![Event::SuggestionQueryChanged {
        query: query.clone(),
      }],
      (SuggestionState::Tracking { .. }, SuggestionState::Idle) => {
        match tr.get_meta(META_COMMIT).and_then(Value::as_str) {
          Some(value) => vec![Event::SuggestionCommitted {
            value: value.to_owned(),
          }],
          None => vec![Event::SuggestionCancelled],
        }
      },
      _ => Vec::new(),
    }
  }
}
