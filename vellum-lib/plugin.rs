//! Plugins: ordered extensions that carry state through the editor's apply
//! cycle.
//!
//! Plugin state is an opaque `Arc<dyn Any>` value regenerated on every
//! applied transaction, the same way the document and selection are. All
//! the context a plugin may react to is handed to it explicitly in
//! [`PluginCtx`]; plugins never reach into the editor.

use std::{
  any::Any,
  sync::Arc,
};

use vellum_core::{
  node::Node,
  schema::Schema,
};

use crate::{
  decoration::DecorationSet,
  selection::Selection,
  state::{
    EditorState,
    Event,
  },
  transaction::Transaction,
};

/// Opaque per-plugin state. Cheap to clone and share between states.
pub type PluginState = Arc<dyn Any + Send + Sync>;

/// Everything a plugin sees when a transaction is applied.
pub struct PluginCtx<'a> {
  pub transaction:    &'a Transaction,
  pub prev_state:     Option<&'a PluginState>,
  pub prev_doc:       &'a Node,
  pub doc:            &'a Node,
  pub prev_selection: &'a Selection,
  pub selection:      &'a Selection,
}

impl<'a> PluginCtx<'a> {
  /// Downcast the previous state to a concrete type.
  pub fn prev<T: 'static>(&self) -> Option<&T> {
    self.prev_state.and_then(|state| state.downcast_ref())
  }
}

pub trait Plugin: Send + Sync {
  /// Stable identifier; used to key plugin state.
  fn id(&self) -> &str;

  /// Initial state for a fresh editor.
  fn init(&self, _schema: &Schema, _doc: &Node) -> Option<PluginState> {
    None
  }

  /// Produce the state for the post-transaction world. The default carries
  /// the previous state forward unchanged.
  fn apply(&self, ctx: &PluginCtx) -> Option<PluginState> {
    ctx.prev_state.cloned()
  }

  /// Decorations this plugin contributes for the given state.
  fn decorations(
    &self,
    _state: Option<&PluginState>,
    _doc: &Node,
    _selection: &Selection,
  ) -> DecorationSet {
    DecorationSet::empty()
  }

  /// A follow-up transaction to apply right after `tr`. Called once per
  /// plugin per dispatch, in registration order; the returned transaction
  /// must start from `new.doc()`.
  fn append_transaction(
    &self,
    _tr: &Transaction,
    _old: &EditorState,
    _new: &EditorState,
  ) -> Option<Transaction> {
    None
  }

  /// Events to surface to editor listeners for this dispatch, derived from
  /// the state change.
  fn events(&self, _tr: &Transaction, _old: &EditorState, _new: &EditorState) -> Vec<Event<'static>> {
    Vec::new()
  }
}

/// The registered plugins, in a fixed order.
#[derive(Clone, Default)]
pub struct PluginHost {
  plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginHost {
  pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> PluginHost {
    PluginHost { plugins }
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
    self.plugins.iter()
  }

  pub fn get(&self, id: &str) -> Option<&Arc<dyn Plugin>> {
    self.plugins.iter().find(|p| p.id() == id)
  }

  pub fn len(&self) -> usize {
    self.plugins.len()
  }

  pub fn is_empty(&self) -> bool {
    self.plugins.is_empty()
  }
}

impl std::fmt::Debug for PluginHost {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list()
      .entries(self.plugins.iter().map(|p| p.id()))
      .finish()
  }
}
