//! Undo history: bounded stacks of inverse-step groups.
//!
//! Each undo unit is a group of inverse steps plus the selection to restore.
//! Consecutive text-only transactions coalesce into one group while they
//! arrive within the configured time window; anything else (structural
//! steps, selection-only transactions, an explicit
//! [`META_NEW_GROUP`] flag) starts a fresh group. Timestamps are passed in
//! by the caller, so grouping behavior is deterministic under test.

use std::time::{
  Duration,
  Instant,
};

use serde_json::Value;

use crate::{
  selection::Selection,
  step::Step,
  transaction::{
    self,
    Transaction,
  },
};

/// Transactions carrying this metadata flag are invisible to history
/// (undo/redo replays set it on themselves).
pub const META_IGNORE: &str = "history.ignore";

/// Forces the transaction into a fresh undo group.
pub const META_NEW_GROUP: &str = "history.newGroup";

#[derive(Debug, Clone)]
pub struct HistoryConfig {
  /// Maximum number of undo groups kept; the oldest falls off.
  pub max_depth:    usize,
  /// Text-only transactions within this window coalesce into one group.
  /// `None` disables coalescing entirely.
  pub group_within: Option<Duration>,
}

impl Default for HistoryConfig {
  fn default() -> Self {
    HistoryConfig {
      max_depth:    100,
      group_within: Some(Duration::from_millis(500)),
    }
  }
}

/// One undo (or redo) unit.
#[derive(Debug, Clone)]
pub struct UndoEntry {
  /// Inverse steps in application order.
  pub steps:     Vec<Step>,
  /// Selection to restore when this entry is replayed.
  pub selection: Selection,
}

#[derive(Debug)]
struct Group {
  steps:     Vec<Step>,
  selection: Selection,
  last_at:   Instant,
  text_only: bool,
}

#[derive(Debug)]
pub struct History {
  config: HistoryConfig,
  undo:   Vec<Group>,
  redo:   Vec<Group>,
  /// Set when the current group was explicitly closed.
  closed: bool,
}

impl History {
  pub fn new(config: HistoryConfig) -> History {
    History {
      config,
      undo: Vec::new(),
      redo: Vec::new(),
      closed: false,
    }
  }

  pub fn undo_depth(&self) -> usize {
    self.undo.len()
  }

  pub fn redo_depth(&self) -> usize {
    self.redo.len()
  }

  /// Stop coalescing into the current group.
  pub fn close_group(&mut self) {
    self.closed = true;
  }

  /// Record an applied transaction. `selection_before` is the selection of
  /// the state the transaction was applied to.
  pub fn record(
    &mut self,
    tr: &Transaction,
    selection_before: &Selection,
    now: Instant,
  ) -> transaction::Result<()> {
    if meta_flag(tr, META_IGNORE) {
      return Ok(());
    }
    if !tr.doc_changed() {
      // Selection-only transactions break the typing burst.
      self.close_group();
      return Ok(());
    }

    let inverse = tr.invert_steps()?;
    let text_only = tr.steps().iter().all(is_text_step);
    self.redo.clear();

    let coalesce = !self.closed
      && !meta_flag(tr, META_NEW_GROUP)
      && text_only
      && match (self.undo.last(), self.config.group_within) {
        (Some(last), Some(window)) => {
          last.text_only && now.saturating_duration_since(last.last_at) <= window
        },
        _ => false,
      };

    if coalesce {
      if let Some(last) = self.undo.last_mut() {
        // Undo replays the newest inverse first.
        last.steps.splice(0..0, inverse);
        last.last_at = now;
        return Ok(());
      }
    }

    self.closed = false;
    self.undo.push(Group {
      steps: inverse,
      selection: selection_before.clone(),
      last_at: now,
      text_only,
    });
    if self.undo.len() > self.config.max_depth {
      self.undo.remove(0);
    }
    Ok(())
  }

  /// Record a follow-up transaction into the newest group, so that one
  /// dispatch (primary transaction plus plugin appends) undoes as a unit.
  /// Falls back to [`History::record`] when no group exists yet.
  pub fn record_more(
    &mut self,
    tr: &Transaction,
    selection_before: &Selection,
    now: Instant,
  ) -> transaction::Result<()> {
    if meta_flag(tr, META_IGNORE) || !tr.doc_changed() {
      return Ok(());
    }
    if self.undo.is_empty() {
      return self.record(tr, selection_before, now);
    }
    let inverse = tr.invert_steps()?;
    if let Some(last) = self.undo.last_mut() {
      last.steps.splice(0..0, inverse);
      last.text_only = last.text_only && tr.steps().iter().all(is_text_step);
      last.last_at = now;
    }
    Ok(())
  }

  pub fn pop_undo(&mut self) -> Option<UndoEntry> {
    self.undo.pop().map(|group| UndoEntry {
      steps:     group.steps,
      selection: group.selection,
    })
  }

  pub fn pop_redo(&mut self) -> Option<UndoEntry> {
    self.redo.pop().map(|group| UndoEntry {
      steps:     group.steps,
      selection: group.selection,
    })
  }

  /// Stash the redo entry produced by an undo. Does not disturb the undo
  /// stack.
  pub fn push_redo(&mut self, entry: UndoEntry, now: Instant) {
    self.redo.push(Group {
      steps:     entry.steps,
      selection: entry.selection,
      last_at:   now,
      text_only: false,
    });
  }

  /// Put an entry back on the undo stack after a redo. Unlike
  /// [`History::record`], this never clears the redo stack.
  pub fn push_undo(&mut self, entry: UndoEntry, now: Instant) {
    self.undo.push(Group {
      steps:     entry.steps,
      selection: entry.selection,
      last_at:   now,
      text_only: false,
    });
    self.closed = true;
    if self.undo.len() > self.config.max_depth {
      self.undo.remove(0);
    }
  }
}

fn meta_flag(tr: &Transaction, key: &str) -> bool {
  tr.get_meta(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Replace steps whose slice is plain text (or empty) count as typing and
/// may coalesce; everything else is structural.
fn is_text_step(step: &Step) -> bool {
  match step {
    Step::Replace { slice, .. } => {
      slice.open_start() == 0
        && slice.open_end() == 0
        && slice.content().iter().all(|node| node.is_text())
    },
    _ => false,
  }
}
