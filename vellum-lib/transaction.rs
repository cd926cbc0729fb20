//! Transactions: ordered batches of steps applied eagerly against a running
//! document.
//!
//! A transaction starts from a base document and accumulates steps; each
//! step is validated and applied the moment it is added, so the transaction
//! always holds the current intermediate document, and an invalid step fails
//! fast without corrupting anything. The composed [`Mapping`] of all steps
//! so far is kept alongside, which is what later steps, the selection and
//! plugin decorations are remapped through.

use indexmap::IndexMap;
use serde_json::Value;
use vellum_core::{
  node::{
    Fragment,
    Mark,
    Node,
  },
  position::PositionError,
  schema::{
    Attrs,
    Schema,
  },
  slice::Slice,
};

use crate::{
  selection::{
    Selection,
    SelectionError,
  },
  step::{
    Mapping,
    Step,
    StepError,
  },
};

pub type Result<T> = std::result::Result<T, TransactionError>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransactionError {
  #[error("no inline insertion point near position {pos}")]
  NoInsertPoint { pos: usize },

  #[error(transparent)]
  Step(#[from] StepError),

  #[error(transparent)]
  Selection(#[from] SelectionError),

  #[error(transparent)]
  Position(#[from] PositionError),
}

#[derive(Debug, Clone)]
pub struct Transaction {
  schema:    Schema,
  before:    Node,
  doc:       Node,
  steps:     Vec<Step>,
  /// Document before each step, for inversion.
  docs:      Vec<Node>,
  mapping:   Mapping,
  selection: Option<Selection>,
  meta:      IndexMap<String, Value>,
}

impl Transaction {
  pub fn new(schema: Schema, doc: Node) -> Transaction {
    Transaction {
      schema,
      before: doc.clone(),
      doc,
      steps: Vec::new(),
      docs: Vec::new(),
      mapping: Mapping::new(),
      selection: None,
      meta: IndexMap::new(),
    }
  }

  pub fn schema(&self) -> &Schema {
    &self.schema
  }

  /// The document the transaction started from.
  pub fn before(&self) -> &Node {
    &self.before
  }

  /// The current document, with every step so far applied.
  pub fn doc(&self) -> &Node {
    &self.doc
  }

  pub fn steps(&self) -> &[Step] {
    &self.steps
  }

  pub fn mapping(&self) -> &Mapping {
    &self.mapping
  }

  pub fn doc_changed(&self) -> bool {
    !self.steps.is_empty()
  }

  /// The selection explicitly set on this transaction, if any.
  pub fn selection(&self) -> Option<&Selection> {
    self.selection.as_ref()
  }

  /// Add a step. It is applied immediately; on failure the transaction is
  /// unchanged and should be discarded by the caller.
  pub fn step(&mut self, step: Step) -> Result<()> {
    let doc = step.apply(&self.doc)?;
    self.docs.push(self.doc.clone());
    self.mapping.push(step.step_map());
    self.steps.push(step);
    self.doc = doc;
    Ok(())
  }

  pub fn replace(&mut self, from: usize, to: usize, slice: Slice) -> Result<()> {
    self.step(Step::Replace { from, to, slice })
  }

  pub fn delete_range(&mut self, from: usize, to: usize) -> Result<()> {
    if from == to {
      return Ok(());
    }
    self.replace(from, to, Slice::empty())
  }

  /// Insert text at (or near) a position. Positions that sit between blocks
  /// slide to the nearest inline point, and the text inherits the marks at
  /// the insertion point.
  pub fn insert_text(&mut self, pos: usize, text: &str) -> Result<()> {
    if text.is_empty() {
      return Ok(());
    }
    let pos = self.inline_insert_pos(pos)?;
    let marks = self.doc.resolve(pos)?.marks();
    let run = self.schema.text_with_marks(text, marks);
    self.replace(pos, pos, Slice::new(Fragment::from(run), 0, 0))
  }

  pub fn add_mark(&mut self, from: usize, to: usize, mark: Mark) -> Result<()> {
    self.step(Step::AddMark { from, to, mark })
  }

  pub fn remove_mark(&mut self, from: usize, to: usize, mark: Mark) -> Result<()> {
    self.step(Step::RemoveMark { from, to, mark })
  }

  pub fn set_attrs(&mut self, pos: Option<usize>, attrs: Attrs) -> Result<()> {
    self.step(Step::SetAttrs { pos, attrs })
  }

  /// Set the selection the editor should have after this transaction. It is
  /// validated against the current (post-step) document.
  pub fn set_selection(&mut self, selection: Selection) -> Result<()> {
    let checked = match selection {
      Selection::Text { anchor, head } => Selection::text(&self.doc, anchor, head)?,
      Selection::Node { pos, .. } => Selection::node(&self.doc, pos)?,
    };
    self.selection = Some(checked);
    Ok(())
  }

  pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
    self.meta.insert(key.into(), value);
  }

  pub fn get_meta(&self, key: &str) -> Option<&Value> {
    self.meta.get(key)
  }

  /// The inverse steps, in application order (last step's inverse first).
  pub fn invert_steps(&self) -> Result<Vec<Step>> {
    self
      .steps
      .iter()
      .zip(&self.docs)
      .rev()
      .map(|(step, doc)| Ok(step.invert(doc)?))
      .collect()
  }

  /// Nearest position with inline content, searching forward into the node
  /// after `pos`, then backward into the node before it.
  fn inline_insert_pos(&self, pos: usize) -> Result<usize> {
    let rp = self.doc.resolve(pos)?;
    if rp.parent().inline_content() {
      return Ok(pos);
    }

    let mut at = pos;
    let mut cur = rp.node_after();
    while let Some(node) = cur {
      if node.is_leaf() {
        break;
      }
      at += 1;
      if node.inline_content() {
        return Ok(at);
      }
      cur = node.child(0).cloned();
    }

    let mut at = pos;
    let mut cur = rp.node_before();
    while let Some(node) = cur {
      if node.is_leaf() {
        break;
      }
      at -= 1;
      if node.inline_content() {
        return Ok(at);
      }
      cur = node.child(node.child_count().wrapping_sub(1)).cloned();
    }

    Err(TransactionError::NoInsertPoint { pos })
  }
}
