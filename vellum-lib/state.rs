//! Editor state and the editor façade.
//!
//! [`EditorState`] is an immutable value: schema, document, selection and
//! the per-plugin states. Applying a transaction produces a new state and
//! leaves the old one fully usable, so failures never corrupt anything and
//! states can be kept around (history, speculative applies) for free.
//!
//! [`Editor`] owns the current state and the mutable machinery around it:
//! the keymap, the undo history, event listeners, and the dispatch cycle
//! that runs plugin `append_transaction` hooks.

use std::{
  sync::Arc,
  time::Instant,
};

use indexmap::IndexMap;
use serde_json::{
  Value,
  json,
};
use tracing::{
  debug,
  warn,
};
use vellum_core::{
  node::Node,
  schema::{
    Schema,
    SchemaError,
  },
  serialize::SerializeError,
};

use crate::{
  decoration::DecorationSet,
  history::{
    History,
    HistoryConfig,
    META_IGNORE,
    UndoEntry,
  },
  keymap::Keymap,
  plugin::{
    Plugin,
    PluginCtx,
    PluginHost,
    PluginState,
  },
  selection::{
    Selection,
    SelectionError,
  },
  transaction::{
    Transaction,
    TransactionError,
  },
};

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StateError {
  #[error("transaction was built against a stale document")]
  StaleTransaction,

  #[error(transparent)]
  Transaction(#[from] TransactionError),

  #[error(transparent)]
  Selection(#[from] SelectionError),

  #[error(transparent)]
  Schema(#[from] SchemaError),

  #[error(transparent)]
  Serialize(#[from] SerializeError),
}

/// A unit of editor configuration.
pub enum Extension {
  Plugin(Arc<dyn Plugin>),
  Keymap(Keymap),
  History(HistoryConfig),
}

pub struct StateConfig {
  pub schema:     Schema,
  /// Initial document in portable JSON form; `None` builds the schema's
  /// smallest valid document.
  pub doc:        Option<Value>,
  pub selection:  Option<Selection>,
  pub extensions: Vec<Extension>,
}

impl StateConfig {
  pub fn new(schema: Schema) -> StateConfig {
    StateConfig {
      schema,
      doc: None,
      selection: None,
      extensions: Vec::new(),
    }
  }

  pub fn with_doc(mut self, doc: Value) -> StateConfig {
    self.doc = Some(doc);
    self
  }

  pub fn with_selection(mut self, selection: Selection) -> StateConfig {
    self.selection = Some(selection);
    self
  }

  pub fn with_extension(mut self, extension: Extension) -> StateConfig {
    self.extensions.push(extension);
    self
  }
}

/// An immutable editor state. Cloning is cheap; everything inside is
/// shared.
#[derive(Clone)]
pub struct EditorState {
  pub(crate) schema:        Schema,
  pub(crate) doc:           Node,
  pub(crate) selection:     Selection,
  pub(crate) plugins:       Arc<PluginHost>,
  pub(crate) plugin_states: Arc<IndexMap<String, Option<PluginState>>>,
}

impl EditorState {
  pub fn new(
    schema: Schema,
    doc: Option<&Value>,
    selection: Option<Selection>,
    plugins: PluginHost,
  ) -> Result<EditorState> {
    let doc = match doc {
      Some(value) => Node::from_json(&schema, value)?,
      None => schema.default_doc()?,
    };
    let selection = match selection {
      Some(Selection::Text { anchor, head }) => Selection::text(&doc, anchor, head)?,
      Some(Selection::Node { pos, .. }) => Selection::node(&doc, pos)?,
      None => Selection::at_start(&doc),
    };
    let mut states = IndexMap::new();
    for plugin in plugins.iter() {
      states.insert(plugin.id().to_owned(), plugin.init(&schema, &doc));
    }
    Ok(EditorState {
      schema,
      doc,
      selection,
      plugins: Arc::new(plugins),
      plugin_states: Arc::new(states),
    })
  }

  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  pub fn doc(&self) -> &Node {
    &self.doc
  }

  pub fn selection(&self) -> &Selection {
    &self.selection
  }

  pub fn plugins(&self) -> &PluginHost {
    &self.plugins
  }

  pub fn plugin_state(&self, id: &str) -> Option<&PluginState> {
    self.plugin_states.get(id).and_then(|state| state.as_ref())
  }

  /// Start a transaction from this state.
  pub fn tr(&self) -> Transaction {
    Transaction::new(self.schema.clone(), self.doc.clone())
  }

  /// Apply a transaction: take over its document, remap or adopt the
  /// selection, and re-run every plugin in registration order. `self` is
  /// untouched; on error it remains the valid current state.
  pub fn apply(&self, tr: &Transaction) -> Result<EditorState> {
    if !tr.before().same(&self.doc) {
      return Err(StateError::StaleTransaction);
    }
    let doc = tr.doc().clone();
    let selection = match tr.selection() {
      Some(selection) => selection.clone(),
      None => self.selection.map(tr.mapping(), &doc),
    };

    let mut states = IndexMap::with_capacity(self.plugin_states.len());
    for plugin in self.plugins.iter() {
      let ctx = PluginCtx {
        transaction:    tr,
        prev_state:     self.plugin_state(plugin.id()),
        prev_doc:       &self.doc,
        doc:            &doc,
        prev_selection: &self.selection,
        selection:      &selection,
      };
      states.insert(plugin.id().to_owned(), plugin.apply(&ctx));
    }
    debug!(steps = tr.steps().len(), "applied transaction");

    Ok(EditorState {
      schema: self.schema.clone(),
      doc,
      selection,
      plugins: Arc::clone(&self.plugins),
      plugin_states: Arc::new(states),
    })
  }

  /// All plugin decorations for this state, merged and sorted.
  pub fn decorations(&self) -> DecorationSet {
    let mut all = Vec::new();
    for plugin in self.plugins.iter() {
      let set = plugin.decorations(self.plugin_state(plugin.id()), &self.doc, &self.selection);
      all.extend(set.iter().cloned());
    }
    DecorationSet::new(all)
  }
}

impl std::fmt::Debug for EditorState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EditorState")
      .field("doc", &self.doc)
      .field("selection", &self.selection)
      .field("plugins", &self.plugins)
      .finish_non_exhaustive()
  }
}

/// Something that happened during a dispatch, surfaced to listeners.
pub enum Event<'a> {
  TransactionApplied {
    transaction: &'a Transaction,
    old:         &'a EditorState,
    new:         &'a EditorState,
  },
  SelectionChanged {
    selection: &'a Selection,
  },
  SuggestionTriggered {
    trigger: String,
    query:   String,
    pos:     usize,
  },
  SuggestionQueryChanged {
    query: String,
  },
  SuggestionCommitted {
    value: String,
  },
  SuggestionCancelled,
}

impl std::fmt::Debug for Event<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Event::TransactionApplied { transaction, .. } => f
        .debug_struct("TransactionApplied")
        .field("steps", &transaction.steps().len())
        .finish(),
      Event::SelectionChanged { selection } => f
        .debug_struct("SelectionChanged")
        .field("selection", selection)
        .finish(),
      Event::SuggestionTriggered { trigger, query, pos } => f
        .debug_struct("SuggestionTriggered")
        .field("trigger", trigger)
        .field("query", query)
        .field("pos", pos)
        .finish(),
      Event::SuggestionQueryChanged { query } => f
        .debug_struct("SuggestionQueryChanged")
        .field("query", query)
        .finish(),
      Event::SuggestionCommitted { value } => f
        .debug_struct("SuggestionCommitted")
        .field("value", value)
        .finish(),
      Event::SuggestionCancelled => f.write_str("SuggestionCancelled"),
    }
  }
}

type Listener = Box<dyn FnMut(&Event)>;

/// The mutable editor: current state plus keymap, history and listeners.
pub struct Editor {
  state:     EditorState,
  keymap:    Keymap,
  history:   History,
  listeners: Vec<Listener>,
}

impl Editor {
  pub fn new(config: StateConfig) -> Result<Editor> {
    let mut keymap = Keymap::new();
    let mut history_config = HistoryConfig::default();
    let mut plugins = Vec::new();
    for extension in config.extensions {
      match extension {
        Extension::Plugin(plugin) => plugins.push(plugin),
        Extension::Keymap(map) => keymap.merge(map),
        Extension::History(cfg) => history_config = cfg,
      }
    }
    let state = EditorState::new(
      config.schema,
      config.doc.as_ref(),
      config.selection,
      PluginHost::new(plugins),
    )?;
    Ok(Editor {
      state,
      keymap,
      history: History::new(history_config),
      listeners: Vec::new(),
    })
  }

  pub fn state(&self) -> &EditorState {
    &self.state
  }

  pub fn tr(&self) -> Transaction {
    self.state.tr()
  }

  pub fn undo_depth(&self) -> usize {
    self.history.undo_depth()
  }

  pub fn redo_depth(&self) -> usize {
    self.history.redo_depth()
  }

  /// Register a listener for dispatch events.
  pub fn on_event(&mut self, listener: impl FnMut(&Event) + 'static) {
    self.listeners.push(Box::new(listener));
  }

  /// Apply a transaction, run the plugin append cycle, record history and
  /// notify listeners. On error the editor keeps its previous state.
  pub fn dispatch(&mut self, tr: Transaction) -> Result<()> {
    self.dispatch_at(tr, Instant::now())
  }

  /// [`Editor::dispatch`] with an injected clock, for deterministic history
  /// grouping in tests.
  pub fn dispatch_at(&mut self, tr: Transaction, now: Instant) -> Result<()> {
    let old_state = self.state.clone();
    let mut new_state = old_state.apply(&tr)?;
    let ignored = tr
      .get_meta(META_IGNORE)
      .and_then(Value::as_bool)
      .unwrap_or(false);
    let mut applied = vec![tr];

    // One append per plugin per dispatch, in registration order. History
    // replays skip the cycle so undo and redo stay exact inverses.
    if !ignored {
      let plugins = Arc::clone(&new_state.plugins);
      for plugin in plugins.iter() {
        let Some(appended) = plugin.append_transaction(
          applied.last().unwrap_or(&applied[0]),
          &old_state,
          &new_state,
        ) else {
          continue;
        };
        if !appended.before().same(&new_state.doc) {
          warn!(id = plugin.id(), "dropping appended transaction built against a stale document");
          continue;
        }
        new_state = new_state.apply(&appended)?;
        applied.push(appended);
      }
    }

    // All transactions of one dispatch form one undo unit.
    self
      .history
      .record(&applied[0], &old_state.selection, now)?;
    for appended in &applied[1..] {
      self
        .history
        .record_more(appended, &old_state.selection, now)?;
    }

    self.state = new_state;

    let selection_changed = self.state.selection != old_state.selection;
    for transaction in &applied {
      let event = Event::TransactionApplied {
        transaction,
        old: &old_state,
        new: &self.state,
      };
      for listener in &mut self.listeners {
        listener(&event);
      }
    }
    if selection_changed {
      let event = Event::SelectionChanged {
        selection: &self.state.selection,
      };
      for listener in &mut self.listeners {
        listener(&event);
      }
    }
    let plugin_events: Vec<Event<'static>> = self
      .state
      .plugins
      .iter()
      .flat_map(|plugin| plugin.events(&applied[0], &old_state, &self.state))
      .collect();
    for event in &plugin_events {
      for listener in &mut self.listeners {
        listener(event);
      }
    }
    Ok(())
  }

  /// Resolve a key and dispatch the first applicable binding, newest first.
  /// A binding that declines falls through to the next older one. `false`
  /// when the key is unbound or every binding declines.
  pub fn handle_key(&mut self, key: &str) -> Result<bool> {
    let mut built = None;
    for command in self.keymap.resolve(key) {
      let mut tr = self.state.tr();
      if command.run(&self.state, &mut tr) {
        built = Some(tr);
        break;
      }
    }
    match built {
      Some(tr) => {
        self.dispatch(tr)?;
        Ok(true)
      },
      None => Ok(false),
    }
  }

  pub fn undo(&mut self) -> Result<bool> {
    self.undo_at(Instant::now())
  }

  pub fn undo_at(&mut self, now: Instant) -> Result<bool> {
    let Some(entry) = self.history.pop_undo() else {
      return Ok(false);
    };
    let selection_now = self.state.selection.clone();
    let tr = self.replay(entry)?;
    let redo_steps = tr.invert_steps()?;
    self.dispatch_at(tr, now)?;
    self.history.push_redo(
      UndoEntry {
        steps:     redo_steps,
        selection: selection_now,
      },
      now,
    );
    Ok(true)
  }

  pub fn redo(&mut self) -> Result<bool> {
    self.redo_at(Instant::now())
  }

  pub fn redo_at(&mut self, now: Instant) -> Result<bool> {
    let Some(entry) = self.history.pop_redo() else {
      return Ok(false);
    };
    let selection_now = self.state.selection.clone();
    let tr = self.replay(entry)?;
    let undo_steps = tr.invert_steps()?;
    self.dispatch_at(tr, now)?;
    self.history.push_undo(
      UndoEntry {
        steps:     undo_steps,
        selection: selection_now,
      },
      now,
    );
    Ok(true)
  }

  /// Build the history-replay transaction for an entry: its steps, its
  /// recorded selection, flagged invisible to history.
  fn replay(&self, entry: UndoEntry) -> Result<Transaction> {
    let mut tr = self.state.tr();
    for step in entry.steps {
      tr.step(step)?;
    }
    tr.set_selection(entry.selection)?;
    tr.set_meta(META_IGNORE, json!(true));
    Ok(tr)
  }
}

#[cfg(test)]
mod test {
  use std::sync::{
    Mutex,
    atomic::{
      AtomicUsize,
      Ordering,
    },
  };

  use crate::{
    decoration::Decoration,
    testutil::schema,
  };

  use super::*;

  fn base_editor(schema: &Schema, extensions: Vec<Extension>) -> Editor {
    Editor::new(StateConfig {
      schema:     schema.clone(),
      doc:        None,
      selection:  None,
      extensions,
    })
    .unwrap()
  }

  #[test]
  fn default_doc_and_selection() {
    let schema = schema();
    let editor = base_editor(&schema, Vec::new());
    // Smallest valid doc: one empty paragraph, caret inside it.
    assert_eq!(editor.state().doc().child_count(), 1);
    assert_eq!(
      editor.state().selection(),
      &Selection::Text { anchor: 1, head: 1 }
    );
  }

  #[test]
  fn insert_into_empty_doc_moves_the_caret() {
    let schema = schema();
    let mut editor = base_editor(&schema, Vec::new());

    let mut tr = editor.tr();
    tr.insert_text(0, "Hello").unwrap();
    editor.dispatch(tr).unwrap();

    assert_eq!(editor.state().doc().text_content(), "Hello");
    assert_eq!(
      editor.state().selection(),
      &Selection::Text { anchor: 6, head: 6 }
    );
  }

  #[test]
  fn empty_transaction_keeps_the_doc_reference() {
    let schema = schema();
    let state = EditorState::new(schema.clone(), None, None, PluginHost::default()).unwrap();
    let tr = state.tr();
    let next = state.apply(&tr).unwrap();
    assert!(next.doc().same(state.doc()));
    assert_eq!(next.selection(), state.selection());
  }

  #[test]
  fn stale_transactions_are_rejected() {
    let schema = schema();
    let state = EditorState::new(schema.clone(), None, None, PluginHost::default()).unwrap();
    let mut tr = state.tr();
    tr.insert_text(0, "a").unwrap();
    let next = state.apply(&tr).unwrap();

    // `tr` started from `state`, not `next`.
    let mut stale = state.tr();
    stale.insert_text(0, "b").unwrap();
    assert!(matches!(
      next.apply(&stale),
      Err(StateError::StaleTransaction)
    ));
  }

  /// Counts doc-changing transactions in its state.
  struct Counter;

  impl Plugin for Counter {
    fn id(&self) -> &str {
      "counter"
    }

    fn init(&self, _schema: &Schema, _doc: &Node) -> Option<PluginState> {
      Some(Arc::new(0usize))
    }

    fn apply(&self, ctx: &PluginCtx) -> Option<PluginState> {
      let count = ctx.prev::<usize>().copied().unwrap_or(0);
      let next = if ctx.transaction.doc_changed() {
        count + 1
      } else {
        count
      };
      Some(Arc::new(next))
    }

    fn decorations(
      &self,
      state: Option<&PluginState>,
      _doc: &Node,
      _selection: &Selection,
    ) -> DecorationSet {
      let count = state
        .and_then(|s| s.downcast_ref::<usize>())
        .copied()
        .unwrap_or(0);
      if count == 0 {
        DecorationSet::empty()
      } else {
        DecorationSet::new(vec![Decoration::widget(0, json!({ "count": count }))])
      }
    }
  }

  #[test]
  fn plugin_state_flows_through_applies() {
    let schema = schema();
    let mut editor = base_editor(&schema, vec![Extension::Plugin(Arc::new(Counter))]);

    let mut tr = editor.tr();
    tr.insert_text(0, "a").unwrap();
    editor.dispatch(tr).unwrap();
    let mut tr = editor.tr();
    tr.insert_text(2, "b").unwrap();
    editor.dispatch(tr).unwrap();

    let count = editor
      .state()
      .plugin_state("counter")
      .and_then(|s| s.downcast_ref::<usize>())
      .copied();
    assert_eq!(count, Some(2));
    assert_eq!(editor.state().decorations().len(), 1);
  }

  /// Appends one follow-up transaction that uppercases nothing but inserts
  /// a marker character after any insertion of "!".
  struct Echo {
    appends: AtomicUsize,
  }

  impl Plugin for Echo {
    fn id(&self) -> &str {
      "echo"
    }

    fn append_transaction(
      &self,
      tr: &Transaction,
      _old: &EditorState,
      new: &EditorState,
    ) -> Option<Transaction> {
      if !tr.doc_changed() || tr.get_meta("echo").is_some() {
        return None;
      }
      self.appends.fetch_add(1, Ordering::SeqCst);
      let mut follow = new.tr();
      follow.insert_text(new.selection().head(), "*").ok()?;
      follow.set_meta("echo", json!(true));
      Some(follow)
    }
  }

  #[test]
  fn append_cycle_runs_once_per_plugin() {
    let schema = schema();
    let echo = Arc::new(Echo {
      appends: AtomicUsize::new(0),
    });
    let mut editor = base_editor(&schema, vec![Extension::Plugin(echo.clone())]);

    let mut tr = editor.tr();
    tr.insert_text(0, "a").unwrap();
    editor.dispatch(tr).unwrap();

    assert_eq!(editor.state().doc().text_content(), "a*");
    assert_eq!(echo.appends.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn append_joins_the_same_undo_unit() {
    let schema = schema();
    let echo = Arc::new(Echo {
      appends: AtomicUsize::new(0),
    });
    let mut editor = base_editor(&schema, vec![Extension::Plugin(echo.clone())]);

    let mut tr = editor.tr();
    tr.insert_text(0, "a").unwrap();
    editor.dispatch(tr).unwrap();
    assert_eq!(editor.state().doc().text_content(), "a*");
    assert_eq!(editor.undo_depth(), 1);

    editor.undo().unwrap();
    assert_eq!(editor.state().doc().text_content(), "");
  }

  #[test]
  fn handle_key_falls_through_to_an_older_binding() {
    use crate::command::{
      delete_selection,
      insert_text,
    };

    let schema = schema();
    let keymap = Keymap::new()
      .with("Mod-k", insert_text("fallback"))
      .with("Mod-k", delete_selection);
    let mut editor = base_editor(&schema, vec![Extension::Keymap(keymap)]);

    // The caret gives the newer delete_selection nothing to do, so the
    // older insert handles the key.
    assert!(editor.handle_key("Mod-k").unwrap());
    assert_eq!(editor.state().doc().text_content(), "fallback");
    assert!(!editor.handle_key("Unbound").unwrap());
  }

  #[test]
  fn undo_redo_round_trip() {
    let schema = schema();
    let mut editor = base_editor(&schema, Vec::new());

    let mut tr = editor.tr();
    tr.insert_text(0, "Hello").unwrap();
    editor.dispatch(tr).unwrap();
    let after_insert = editor.state().doc().clone();

    assert!(editor.undo().unwrap());
    assert_eq!(editor.state().doc().text_content(), "");
    assert_eq!(
      editor.state().selection(),
      &Selection::Text { anchor: 1, head: 1 }
    );

    assert!(editor.redo().unwrap());
    assert_eq!(editor.state().doc(), &after_insert);
    assert!(!editor.redo().unwrap());
  }

  #[test]
  fn undo_with_empty_history_is_a_noop() {
    let schema = schema();
    let mut editor = base_editor(&schema, Vec::new());
    assert!(!editor.undo().unwrap());
  }

  #[test]
  fn listeners_observe_transactions_and_selection() {
    let schema = schema();
    let mut editor = base_editor(&schema, Vec::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    {
      let log = Arc::clone(&log);
      editor.on_event(move |event| {
        log.lock().unwrap().push(format!("{event:?}"));
      });
    }

    let mut tr = editor.tr();
    tr.insert_text(0, "x").unwrap();
    editor.dispatch(tr).unwrap();

    let log = log.lock().unwrap();
    assert!(log.iter().any(|e| e.contains("TransactionApplied")));
    assert!(log.iter().any(|e| e.contains("SelectionChanged")));
  }

  #[test]
  fn loading_a_doc_from_json() {
    let schema = schema();
    let editor = Editor::new(
      StateConfig::new(schema.clone()).with_doc(json!({
        "type": "doc",
        "content": [
          { "type": "paragraph",
            "content": [{ "type": "text", "text": "loaded" }] }
        ]
      })),
    )
    .unwrap();
    assert_eq!(editor.state().doc().text_content(), "loaded");
  }

  #[test]
  fn invalid_initial_doc_is_an_error() {
    let schema = schema();
    let result = Editor::new(StateConfig::new(schema.clone()).with_doc(json!({ "type": "doc" })));
    assert!(result.is_err());
  }
}
